//! Dispatcher - キューから取り出して実行系に渡す
//!
//! # 流れ（1 件）
//! 1. `pop_if(priority <= threshold)` で取り出す
//! 2. Task を確認（`pending` なら `queued` に進める / 終端なら捨てる）
//! 3. payload を種類に対して検証（不一致は `failed`）
//! 4. timeout 付きで submit → ack なら `dispatched`
//! 5. 失敗なら元の優先度で再投入。`max_attempts` を超えたら `failed` + アラート
//!
//! 組織キューは round-robin で 1 件ずつ回します（1 組織が独占しない）。
//! 停止要求は item の間でだけ確認します。取り出した item は submit の
//! timeout 内で必ず `dispatched` / 再投入 / `failed` のどれかになります。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::{ErrorAction, LoomError, TaskId, TaskKind, TaskStatus};
use crate::ports::{Clock, ExecutionSink, Store, StoreError, TaskStore};
use crate::queue::{PrioritizedItem, PriorityQueue, QueueRegistry};

use super::status::{Alert, StatusBoard};

/// Which heads are ready to leave the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchThreshold {
    /// Everything queued is ready.
    Unbounded,
    /// Priorities are epoch seconds; ready once they are due.
    Now,
}

impl DispatchThreshold {
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Scan | TaskKind::Normalization => DispatchThreshold::Unbounded,
            TaskKind::Report => DispatchThreshold::Now,
        }
    }

    pub fn admits(self, priority: i64, now: i64) -> bool {
        match self {
            DispatchThreshold::Unbounded => true,
            DispatchThreshold::Now => priority <= now,
        }
    }
}

/// What happened to one popped item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    Requeued { attempts: u32 },
    Failed,
    Dropped,
}

pub struct Dispatcher {
    kind: TaskKind,
    threshold: DispatchThreshold,
    queues: Arc<QueueRegistry>,
    store: Arc<dyn Store>,
    sink: Arc<dyn ExecutionSink>,
    status: Arc<StatusBoard>,
    clock: Arc<dyn Clock>,
    submit_timeout: Duration,
    max_attempts: u32,
    interval: Duration,
    attempts: HashMap<TaskId, u32>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TaskKind,
        queues: Arc<QueueRegistry>,
        store: Arc<dyn Store>,
        sink: Arc<dyn ExecutionSink>,
        status: Arc<StatusBoard>,
        clock: Arc<dyn Clock>,
        submit_timeout: Duration,
        max_attempts: u32,
        interval: Duration,
    ) -> Self {
        Self {
            kind,
            threshold: DispatchThreshold::for_kind(kind),
            queues,
            store,
            sink,
            status,
            clock,
            submit_timeout,
            max_attempts: max_attempts.max(1),
            interval,
            attempts: HashMap::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<(), LoomError> {
        info!(kind = %self.kind, "dispatcher started");
        loop {
            if *stop.borrow() {
                break;
            }

            let dispatched = self.dispatch_round(&stop).await?;
            if dispatched > 0 {
                continue;
            }

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!(kind = %self.kind, "dispatcher stopped");
        Ok(())
    }

    /// Take at most one ready item from every organisation queue, stopping
    /// early once `stop` turns `true`.
    /// Returns the number of items taken; only `Abort` errors escape.
    pub async fn dispatch_round(&mut self, stop: &watch::Receiver<bool>) -> Result<usize, LoomError> {
        let mut taken = 0;
        for queue in self.queues.queues_for(self.kind) {
            if *stop.borrow() {
                break;
            }
            let now = self.clock.now().timestamp();
            let threshold = self.threshold;
            let Some(item) = queue.pop_if(|head| threshold.admits(head.priority, now)) else {
                continue;
            };
            taken += 1;

            if let Err(e) = self.dispatch(&queue, item.clone()).await {
                match e.action() {
                    ErrorAction::Abort => return Err(e),
                    ErrorAction::Backoff => {
                        warn!(queue_id = queue.id(), task_id = %item.id, error = %e, "dispatch interrupted, requeueing");
                        if let Err(push) = queue.push(item) {
                            warn!(queue_id = queue.id(), error = %push, "could not requeue item");
                        }
                    }
                    ErrorAction::Skip => {
                        warn!(queue_id = queue.id(), task_id = %item.id, error = %e, "dropping item")
                    }
                }
            }
        }
        Ok(taken)
    }

    pub async fn dispatch(
        &mut self,
        queue: &PriorityQueue,
        item: PrioritizedItem,
    ) -> Result<DispatchOutcome, LoomError> {
        let Some(task) = self.store.get_task(item.id).await? else {
            warn!(queue_id = queue.id(), task_id = %item.id, "queued item has no task record, dropping");
            return Ok(DispatchOutcome::Dropped);
        };

        let status = match task.status {
            TaskStatus::Pending => self.advance(item.id, TaskStatus::Queued).await?,
            status => status,
        };
        if status != TaskStatus::Queued {
            debug!(task_id = %item.id, %status, "task moved on while queued, dropping");
            self.attempts.remove(&item.id);
            return Ok(DispatchOutcome::Dropped);
        }

        if let Err(e) = item.payload.validate_for(self.kind) {
            warn!(task_id = %item.id, error = %e, "payload does not match scheduler kind");
            self.advance(item.id, TaskStatus::Failed).await?;
            return Ok(DispatchOutcome::Failed);
        }

        let submitted =
            tokio::time::timeout(self.submit_timeout, self.sink.submit(item.id, &item.payload))
                .await;
        let failure = match submitted {
            Ok(Ok(())) => {
                self.attempts.remove(&item.id);
                self.advance(item.id, TaskStatus::Dispatched).await?;
                debug!(task_id = %item.id, queue_id = queue.id(), "dispatched");
                return Ok(DispatchOutcome::Dispatched);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("sink did not answer within {:?}", self.submit_timeout),
        };

        let attempts = {
            let attempts = self.attempts.entry(item.id).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if attempts >= self.max_attempts {
            self.attempts.remove(&item.id);
            self.give_up(queue, item.id, format!("dispatch failed after {attempts} attempt(s): {failure}"))
                .await?;
            return Ok(DispatchOutcome::Failed);
        }

        warn!(task_id = %item.id, attempts, error = %failure, "dispatch failed, requeueing");
        let task_id = item.id;
        if let Err(e) = queue.push(item) {
            self.attempts.remove(&task_id);
            self.give_up(queue, task_id, format!("requeue after failed dispatch: {e}"))
                .await?;
            return Ok(DispatchOutcome::Failed);
        }
        Ok(DispatchOutcome::Requeued { attempts })
    }

    async fn advance(&self, task_id: TaskId, to: TaskStatus) -> Result<TaskStatus, StoreError> {
        match self.store.update_status(task_id, to).await {
            Ok(task) => Ok(task.status),
            // a callback or an operator got there first
            Err(StoreError::InvalidTransition(e)) => {
                debug!(task_id = %task_id, error = %e, "status already moved");
                Ok(e.from)
            }
            Err(e) => Err(e),
        }
    }

    async fn give_up(
        &self,
        queue: &PriorityQueue,
        task_id: TaskId,
        message: String,
    ) -> Result<(), StoreError> {
        self.advance(task_id, TaskStatus::Failed).await?;
        self.status.raise(Alert {
            at: self.clock.now(),
            scheduler_id: queue.id().to_string(),
            task_id: Some(task_id),
            message,
        });
        Ok(())
    }
}
