//! Scheduler - 種類ごとの投入ループ
//!
//! 1 周期の流れ:
//! 1. （遅い間隔で）組織一覧を更新し、キューを作成・退役させる
//! 2. 有効なら組織ごとに Populator を呼ぶ
//! 3. `populate_interval` 待つ（停止シグナルと select）
//!
//! 1 組織の失敗でループは止まりません。`ErrorAction::Abort` のときだけ抜けます。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{ErrorAction, LoomError, TaskKind};
use crate::ports::PluginCatalog;
use crate::queue::{QueueKey, QueueRegistry};

use super::enqueue::Enqueuer;
use super::populate::Populator;
use super::status::{SchedulerState, StatusBoard};

pub struct Scheduler {
    kind: TaskKind,
    populator: Arc<dyn Populator>,
    catalog: Arc<dyn PluginCatalog>,
    queues: Arc<QueueRegistry>,
    enqueuer: Arc<Enqueuer>,
    status: Arc<StatusBoard>,
    populate_interval: Duration,
    refresh_interval: Duration,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        populator: Arc<dyn Populator>,
        catalog: Arc<dyn PluginCatalog>,
        queues: Arc<QueueRegistry>,
        enqueuer: Arc<Enqueuer>,
        status: Arc<StatusBoard>,
        populate_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            kind: populator.kind(),
            populator,
            catalog,
            queues,
            enqueuer,
            status,
            populate_interval,
            refresh_interval,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<(), LoomError> {
        let kind = self.kind;
        self.status.set_state(kind, SchedulerState::Running);
        info!(%kind, "scheduler started");

        let result = self.run_loop(&mut stop).await;

        self.status.set_state(kind, SchedulerState::Stopped);
        info!(%kind, "scheduler stopped");
        result
    }

    async fn run_loop(&self, stop: &mut watch::Receiver<bool>) -> Result<(), LoomError> {
        let mut refreshed_at: Option<Instant> = None;
        loop {
            if *stop.borrow() {
                break;
            }

            if refreshed_at.is_none_or(|at| at.elapsed() >= self.refresh_interval) {
                match self.refresh_organisations().await {
                    Ok(_) => refreshed_at = Some(Instant::now()),
                    Err(e) if e.action() == ErrorAction::Abort => return Err(e),
                    Err(e) => warn!(kind = %self.kind, error = %e, "organisation refresh failed"),
                }
            }

            if self.status.is_enabled(self.kind) {
                tokio::select! {
                    _ = stop.changed() => break,
                    result = self.populate_all() => result?,
                }
            }

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(self.populate_interval) => {}
            }
        }
        self.status.set_state(self.kind, SchedulerState::Stopping);
        Ok(())
    }

    /// Sync queues with the catalog's organisations.
    /// Returns `(added, removed)`.
    pub async fn refresh_organisations(
        &self,
    ) -> Result<(BTreeSet<String>, BTreeSet<String>), LoomError> {
        let current: BTreeSet<String> = self
            .catalog
            .list_organisations()
            .await?
            .into_iter()
            .map(|org| org.id)
            .collect();
        let known = self.queues.organisations(self.kind);

        let added: BTreeSet<String> = current.difference(&known).cloned().collect();
        let removed: BTreeSet<String> = known.difference(&current).cloned().collect();

        for organisation in &added {
            self.queues
                .get_or_create(&QueueKey::new(self.kind, organisation.as_str()));
        }
        for organisation in &removed {
            let drained = self
                .queues
                .retire(&QueueKey::new(self.kind, organisation.as_str()));
            let cancelled = self.enqueuer.cancel_items(drained).await;
            info!(kind = %self.kind, organisation = %organisation, cancelled, "organisation removed, queue retired");
        }
        if !added.is_empty() {
            info!(kind = %self.kind, added = added.len(), "new organisations");
            self.catalog.flush_cache().await;
        }
        Ok((added, removed))
    }

    /// One population pass over every organisation queue.
    /// Only an `Abort` error is returned; everything else is logged.
    pub async fn populate_all(&self) -> Result<(), LoomError> {
        for queue in self.queues.queues_for(self.kind) {
            let Some(key) = QueueKey::parse(queue.id()) else {
                continue;
            };
            match self.populator.populate(&queue, &key.organisation).await {
                Ok(report) => debug!(queue_id = queue.id(), ?report, "populated"),
                Err(e) => match e.action() {
                    ErrorAction::Skip => {
                        debug!(queue_id = queue.id(), error = %e, "population cut short")
                    }
                    ErrorAction::Backoff => {
                        warn!(queue_id = queue.id(), error = %e, "population failed, retrying next interval")
                    }
                    ErrorAction::Abort => return Err(e),
                },
            }
        }
        Ok(())
    }
}

/// Enable/disable switch per scheduler kind.
pub struct SchedulerControl {
    queues: Arc<QueueRegistry>,
    enqueuer: Arc<Enqueuer>,
    status: Arc<StatusBoard>,
}

impl SchedulerControl {
    pub fn new(queues: Arc<QueueRegistry>, enqueuer: Arc<Enqueuer>, status: Arc<StatusBoard>) -> Self {
        Self {
            queues,
            enqueuer,
            status,
        }
    }

    pub fn enable(&self, kind: TaskKind) {
        if !self.status.set_enabled(kind, true) {
            info!(%kind, "scheduler enabled");
        }
    }

    /// Stop population and cancel whatever is still queued. Returns the
    /// number of cancelled tasks.
    pub async fn disable(&self, kind: TaskKind) -> usize {
        self.status.set_enabled(kind, false);
        let mut cancelled = 0;
        for queue in self.queues.queues_for(kind) {
            cancelled += self.enqueuer.cancel_items(queue.drain()).await;
        }
        info!(%kind, cancelled, "scheduler disabled");
        cancelled
    }
}
