//! Scan population: every enabled boefje against every target it may scan.
//!
//! `dispatched` のまま grace period を過ぎた Task は実行系が落ちたとみなし、
//! `failed` にしてアラートを出してから再び順位付けします。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::app::enqueue::{EnqueueOutcome, Enqueuer};
use crate::app::status::{Alert, StatusBoard};
use crate::domain::{
    LoomError, Plugin, PluginType, Schedule, ScanTask, Target, Task, TaskKind, TaskPayload,
    TaskStatus,
};
use crate::ports::{
    ArtifactStore, ObjectStore, PluginCatalog, ScheduleStore, StoreError, TaskStore,
};
use crate::queue::PriorityQueue;
use crate::ranker::{DeadlineRanker, NOT_ELIGIBLE, ScanRanker};

use super::{PopulateReport, Populator};

/// Lowest clearance a target needs to be considered at all.
const MIN_SCAN_LEVEL: u8 = 1;

pub struct ScanPopulator {
    catalog: Arc<dyn PluginCatalog>,
    objects: Arc<dyn ObjectStore>,
    artifacts: Arc<dyn ArtifactStore>,
    enqueuer: Arc<Enqueuer>,
    status: Arc<StatusBoard>,
    ranker: ScanRanker,
    deadlines: DeadlineRanker,
}

impl ScanPopulator {
    pub fn new(
        catalog: Arc<dyn PluginCatalog>,
        objects: Arc<dyn ObjectStore>,
        artifacts: Arc<dyn ArtifactStore>,
        enqueuer: Arc<Enqueuer>,
        status: Arc<StatusBoard>,
        ranker: ScanRanker,
        deadlines: DeadlineRanker,
    ) -> Self {
        Self {
            catalog,
            objects,
            artifacts,
            enqueuer,
            status,
            ranker,
            deadlines,
        }
    }

    /// Rank and enqueue one (plugin, target) pair. `None` when it sits out this cycle.
    async fn candidate(
        &self,
        queue: &PriorityQueue,
        plugin: &Plugin,
        target: &Target,
        organisation: &str,
    ) -> Result<Option<EnqueueOutcome>, LoomError> {
        let payload = TaskPayload::Scan(ScanTask {
            organisation: organisation.to_string(),
            plugin_id: plugin.id.clone(),
            plugin_version: plugin.version.clone(),
            input_ooi: Some(target.primary_key.clone()),
        });
        payload.validate()?;

        let Some(priority) = self
            .rank(queue, &payload, plugin, &target.primary_key, organisation)
            .await?
        else {
            return Ok(None);
        };

        let outcome = self.enqueuer.enqueue(queue, payload.clone(), priority).await?;
        if matches!(outcome, EnqueueOutcome::Inserted(_)) {
            self.upsert_schedule(&payload).await?;
        }
        Ok(Some(outcome))
    }

    /// Rank one (plugin, target) pair. `None` when it must sit out this cycle.
    async fn rank(
        &self,
        queue: &PriorityQueue,
        payload: &TaskPayload,
        plugin: &Plugin,
        primary_key: &str,
        organisation: &str,
    ) -> Result<Option<i64>, LoomError> {
        let store = self.enqueuer.store();
        let hash = payload.hash();

        let schedule = store.get_schedule_by_hash(&hash).await?;
        if schedule.is_some_and(|s| !s.enabled) {
            return Ok(None);
        }

        let finished_at = match store.latest_task_by_hash(&hash).await? {
            Some(task) if self.is_stalled(&task) => {
                if !self.fail_stalled(queue, &task).await? {
                    return Ok(None);
                }
                Some(task.modified_at)
            }
            Some(task) if task.status.is_in_flight() => return Ok(None),
            Some(task) if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) => {
                Some(task.modified_at)
            }
            _ => None,
        };

        let last_run = self
            .artifacts
            .get_last_run(TaskKind::Scan, &plugin.id, primary_key, organisation)
            .await?;
        let last_run = last_run.max(finished_at);

        let priority = self.ranker.rank(last_run, self.enqueuer.now());
        Ok((priority != NOT_ELIGIBLE).then_some(priority))
    }

    /// Accepted by the sink but never reported running within the grace period.
    fn is_stalled(&self, task: &Task) -> bool {
        task.status == TaskStatus::Dispatched
            && task.modified_at + self.ranker.grace_period < self.enqueuer.now()
    }

    /// Fail a stalled task and raise an alert. `false` if a callback moved it on first.
    async fn fail_stalled(&self, queue: &PriorityQueue, task: &Task) -> Result<bool, StoreError> {
        match self
            .enqueuer
            .store()
            .update_status(task.id, TaskStatus::Failed)
            .await
        {
            Ok(_) => {}
            Err(StoreError::InvalidTransition(e)) => {
                debug!(task_id = %task.id, error = %e, "stalled task moved on");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        warn!(queue_id = queue.id(), task_id = %task.id, dispatched_at = %task.modified_at, "dispatched task stalled, marked failed");
        self.status.raise(Alert {
            at: self.enqueuer.now(),
            scheduler_id: queue.id().to_string(),
            task_id: Some(task.id),
            message: format!("task stalled in dispatched since {}", task.modified_at),
        });
        Ok(true)
    }

    /// Keep a schedule per scan so operators can switch it off.
    async fn upsert_schedule(&self, payload: &TaskPayload) -> Result<(), StoreError> {
        let store = self.enqueuer.store();
        let now = self.enqueuer.now();
        let deadline_at = self.deadlines.next_deadline(None, now);

        match store.get_schedule_by_hash(&payload.hash()).await? {
            Some(mut schedule) => {
                schedule.deadline_at = deadline_at;
                store.update_schedule(&schedule).await?;
            }
            None => {
                let schedule = Schedule::new(
                    self.enqueuer.ids().generate_schedule_id(),
                    payload.clone(),
                    None,
                    deadline_at,
                    now,
                );
                match store.create_schedule(schedule).await {
                    Ok(_) | Err(StoreError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Populator for ScanPopulator {
    fn kind(&self) -> TaskKind {
        TaskKind::Scan
    }

    async fn populate(
        &self,
        queue: &PriorityQueue,
        organisation: &str,
    ) -> Result<PopulateReport, LoomError> {
        let mut report = PopulateReport::default();

        let boefjes: Vec<Plugin> = self
            .catalog
            .get_enabled_plugins(organisation)
            .await?
            .into_iter()
            .filter(|p| p.plugin_type == PluginType::Boefje && p.enabled)
            .collect();
        if boefjes.is_empty() {
            debug!(organisation, "no enabled boefjes");
            return Ok(report);
        }

        let targets = self
            .objects
            .get_scan_candidates(organisation, MIN_SCAN_LEVEL)
            .await?;

        for target in &targets {
            for plugin in boefjes.iter().filter(|p| p.can_scan(target)) {
                match self.candidate(queue, plugin, target, organisation).await {
                    Ok(Some(outcome)) => report.record(&outcome),
                    Ok(None) => report.skip(),
                    Err(e) => report.skip_failed(queue.id(), e)?,
                }
            }
        }

        debug!(
            organisation,
            targets = targets.len(),
            inserted = report.inserted,
            skipped = report.skipped,
            "scan population done"
        );
        Ok(report)
    }
}
