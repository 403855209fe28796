//! Enqueuer - Task レコードとキューを揃えて更新する
//!
//! # 手順（新しい hash の場合）
//! 1. 容量チェック（満杯なら何も書かずに `QueueFull`）
//! 2. Task を `pending` で作成
//! 3. push → `Inserted` なら `queued` へ
//! 4. push が競合で失敗したら作った Task を `cancelled` にする
//!
//! 既にキューにある hash は push だけ行い、優先度が下がったら Task 側も更新します。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{LoomError, Schedule, Task, TaskId, TaskPayload, TaskStatus};
use crate::ports::{Clock, IdGenerator, ScheduleStore, Store, StoreError, TaskStore};
use crate::queue::{PrioritizedItem, PriorityQueue, PushOutcome, QueueError};

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new task record was created and queued.
    Inserted(Task),
    /// The queued task moved to a lower priority.
    Updated {
        task_id: TaskId,
        previous: i64,
        priority: i64,
    },
    Unchanged,
}

pub struct Enqueuer {
    store: Arc<dyn Store>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn Store>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { store, ids, clock }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Latest task for `hash` is pending, dispatched or running.
    pub async fn in_flight(&self, hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .latest_task_by_hash(hash)
            .await?
            .is_some_and(|task| task.status.is_in_flight()))
    }

    pub async fn enqueue(
        &self,
        queue: &PriorityQueue,
        payload: TaskPayload,
        priority: i64,
    ) -> Result<EnqueueOutcome, LoomError> {
        payload.validate()?;
        if let Some(outcome) = self.reprioritize(queue, &payload, priority).await? {
            return Ok(outcome);
        }
        ensure_capacity(queue)?;

        let task = Task::new(self.ids.generate_task_id(), payload, priority, self.now());
        let task = self.store.create_task(task).await?;
        self.push_created(queue, task).await
    }

    /// Fire a due schedule: task creation and the deadline move happen in one
    /// store transaction, then the task is pushed. If the push fails the
    /// deadline is put back and the task cancelled.
    pub async fn fire(
        &self,
        queue: &PriorityQueue,
        schedule: &Schedule,
        next_deadline: DateTime<Utc>,
        priority: i64,
    ) -> Result<EnqueueOutcome, LoomError> {
        schedule.payload.validate()?;
        if let Some(outcome) = self.reprioritize(queue, &schedule.payload, priority).await? {
            let mut advanced = schedule.clone();
            advanced.deadline_at = next_deadline;
            self.store.update_schedule(&advanced).await?;
            return Ok(outcome);
        }
        ensure_capacity(queue)?;

        let task = Task::new(
            self.ids.generate_task_id(),
            schedule.payload.clone(),
            priority,
            self.now(),
        );
        let task = self
            .store
            .fire_schedule(schedule.id, task, next_deadline)
            .await?;

        match self.push_created(queue, task).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(revert) = self.store.update_schedule(schedule).await {
                    warn!(schedule_id = %schedule.id, error = %revert, "failed to restore schedule deadline");
                }
                Err(e)
            }
        }
    }

    /// Reprioritize a hash that is already queued. `None` if it is not.
    async fn reprioritize(
        &self,
        queue: &PriorityQueue,
        payload: &TaskPayload,
        priority: i64,
    ) -> Result<Option<EnqueueOutcome>, LoomError> {
        let Some((task_id, outcome)) = queue.update_priority(&payload.hash(), priority) else {
            return Ok(None);
        };

        match outcome {
            PushOutcome::Updated { previous } => {
                self.store.update_priority(task_id, priority).await?;
                debug!(queue_id = queue.id(), task_id = %task_id, previous, priority, "queued task reprioritized");
                Ok(Some(EnqueueOutcome::Updated {
                    task_id,
                    previous,
                    priority,
                }))
            }
            PushOutcome::Unchanged | PushOutcome::Inserted => Ok(Some(EnqueueOutcome::Unchanged)),
        }
    }

    async fn push_created(
        &self,
        queue: &PriorityQueue,
        task: Task,
    ) -> Result<EnqueueOutcome, LoomError> {
        let item = PrioritizedItem::new(task.id, task.priority, task.payload.clone());
        match queue.push(item) {
            Ok(PushOutcome::Inserted) => match self.store.update_status(task.id, TaskStatus::Queued).await {
                Ok(task) => Ok(EnqueueOutcome::Inserted(task)),
                // the dispatcher got to it first
                Err(StoreError::InvalidTransition(_)) => Ok(EnqueueOutcome::Inserted(task)),
                Err(e) => Err(e.into()),
            },
            Ok(_) => {
                // another writer queued the same hash meanwhile
                self.cancel(task.id).await;
                Ok(EnqueueOutcome::Unchanged)
            }
            Err(e) => {
                self.cancel(task.id).await;
                Err(e.into())
            }
        }
    }

    pub(crate) async fn cancel(&self, task_id: TaskId) {
        if let Err(e) = self.store.update_status(task_id, TaskStatus::Cancelled).await {
            warn!(task_id = %task_id, error = %e, "failed to cancel task");
        }
    }

    /// Cancel the tasks of items that will never be dispatched.
    pub async fn cancel_items(&self, items: Vec<PrioritizedItem>) -> usize {
        let count = items.len();
        for item in items {
            self.cancel(item.id).await;
        }
        count
    }
}

fn ensure_capacity(queue: &PriorityQueue) -> Result<(), QueueError> {
    if queue.is_full() {
        return Err(QueueError::Full {
            queue_id: queue.id().to_string(),
            capacity: queue.capacity(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportTask, ScanTask, TaskKind};
    use crate::impls::InMemoryStore;
    use crate::ports::{ScheduleStore, TaskFilter, TaskStore, UlidGenerator};
    use crate::testing;
    use chrono::Duration;

    fn scan(ooi: &str) -> TaskPayload {
        TaskPayload::Scan(ScanTask {
            organisation: "acme".into(),
            plugin_id: "dns-records".into(),
            plugin_version: None,
            input_ooi: Some(ooi.into()),
        })
    }

    fn enqueuer() -> (Arc<InMemoryStore>, Enqueuer) {
        let clock = testing::clock();
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        (store.clone(), Enqueuer::new(store, ids, clock))
    }

    #[tokio::test]
    async fn new_hash_creates_a_queued_task() {
        let (store, enqueuer) = enqueuer();
        let queue = PriorityQueue::new("scan-acme", 10);

        let outcome = enqueuer.enqueue(&queue, scan("a"), 50).await.unwrap();
        let EnqueueOutcome::Inserted(task) = outcome else {
            panic!("expected insert, got {outcome:?}");
        };
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(queue.get(&task.hash).unwrap().id, task.id);

        let events = store.task_events(task.id).await.unwrap();
        let statuses: Vec<TaskStatus> = events.iter().map(|e| e.new_status).collect();
        assert_eq!(statuses, vec![TaskStatus::Pending, TaskStatus::Queued]);
    }

    #[tokio::test]
    async fn lower_priority_updates_the_queued_task() {
        let (store, enqueuer) = enqueuer();
        let queue = PriorityQueue::new("scan-acme", 10);
        let EnqueueOutcome::Inserted(task) = enqueuer.enqueue(&queue, scan("a"), 50).await.unwrap()
        else {
            panic!("expected insert");
        };

        assert_eq!(
            enqueuer.enqueue(&queue, scan("a"), 80).await.unwrap(),
            EnqueueOutcome::Unchanged
        );
        assert_eq!(
            enqueuer.enqueue(&queue, scan("a"), 10).await.unwrap(),
            EnqueueOutcome::Updated {
                task_id: task.id,
                previous: 50,
                priority: 10
            }
        );
        assert_eq!(store.get_task(task.id).await.unwrap().unwrap().priority, 10);
        assert_eq!(store.list_tasks(&TaskFilter::default()).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn full_queue_writes_no_task() {
        let (store, enqueuer) = enqueuer();
        let queue = PriorityQueue::new("scan-acme", 1);
        enqueuer.enqueue(&queue, scan("a"), 5).await.unwrap();

        let err = enqueuer.enqueue(&queue, scan("b"), 5).await.unwrap_err();
        assert!(matches!(err, LoomError::Queue(QueueError::Full { .. })));
        assert_eq!(store.list_tasks(&TaskFilter::default()).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_any_write() {
        let (store, enqueuer) = enqueuer();
        let queue = PriorityQueue::new("scan-acme", 10);
        let mut payload = scan("a");
        if let TaskPayload::Scan(t) = &mut payload {
            t.plugin_id.clear();
        }

        let err = enqueuer.enqueue(&queue, payload, 5).await.unwrap_err();
        assert!(matches!(err, LoomError::Validation(_)));
        assert!(queue.is_empty());
        assert_eq!(store.list_tasks(&TaskFilter::default()).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn firing_moves_deadline_and_queues_linked_task() {
        let (store, enqueuer) = enqueuer();
        let queue = PriorityQueue::new("report-acme", 10);
        let now = testing::start();
        let payload = TaskPayload::Report(ReportTask {
            organisation: "acme".into(),
            report_recipe_id: "weekly".into(),
        });
        let schedule = Schedule::new(
            enqueuer.ids().generate_schedule_id(),
            payload,
            None,
            now - Duration::minutes(1),
            now - Duration::days(1),
        );
        let schedule = store.create_schedule(schedule).await.unwrap();
        let next = now + Duration::days(1);

        let outcome = enqueuer
            .fire(&queue, &schedule, next, schedule.deadline_at.timestamp())
            .await
            .unwrap();
        let EnqueueOutcome::Inserted(task) = outcome else {
            panic!("expected insert, got {outcome:?}");
        };
        assert_eq!(task.schedule_id, Some(schedule.id));
        assert_eq!(task.kind, TaskKind::Report);
        assert_eq!(task.status, TaskStatus::Queued);

        let stored = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.deadline_at, next);
        assert!(store.due_schedules("report-acme", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_items_leave_cancelled_tasks() {
        let (store, enqueuer) = enqueuer();
        let queue = PriorityQueue::new("scan-acme", 10);
        enqueuer.enqueue(&queue, scan("a"), 5).await.unwrap();
        enqueuer.enqueue(&queue, scan("b"), 6).await.unwrap();

        assert_eq!(enqueuer.cancel_items(queue.drain()).await, 2);
        let cancelled = TaskFilter {
            status: Some(TaskStatus::Cancelled),
            ..TaskFilter::default()
        };
        assert_eq!(store.list_tasks(&cancelled).await.unwrap().count, 2);
    }
}
