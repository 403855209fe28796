//! Report population: fire the organisation's due schedules.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::app::enqueue::Enqueuer;
use crate::domain::{LoomError, TaskKind};
use crate::ports::ScheduleStore;
use crate::queue::PriorityQueue;
use crate::ranker::DeadlineRanker;

use super::{PopulateReport, Populator};

pub struct ReportPopulator {
    enqueuer: Arc<Enqueuer>,
    deadlines: DeadlineRanker,
}

impl ReportPopulator {
    pub fn new(enqueuer: Arc<Enqueuer>, deadlines: DeadlineRanker) -> Self {
        Self { enqueuer, deadlines }
    }
}

#[async_trait]
impl Populator for ReportPopulator {
    fn kind(&self) -> TaskKind {
        TaskKind::Report
    }

    async fn populate(
        &self,
        queue: &PriorityQueue,
        organisation: &str,
    ) -> Result<PopulateReport, LoomError> {
        let mut report = PopulateReport::default();
        let now = self.enqueuer.now();
        let scheduler_id = TaskKind::Report.scheduler_id(organisation);

        let due = self
            .enqueuer
            .store()
            .due_schedules(&scheduler_id, now)
            .await?;

        for schedule in &due {
            let cron = match schedule
                .payload
                .validate_for(TaskKind::Report)
                .and_then(|()| schedule.cron())
            {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "skipping unusable schedule");
                    report.skip();
                    continue;
                }
            };
            let next_deadline = self.deadlines.next_deadline(cron.as_ref(), now);
            let priority = schedule.deadline_at.timestamp();

            match self.enqueuer.fire(queue, schedule, next_deadline, priority).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => report.skip_failed(queue.id(), e)?,
            }
        }

        if !due.is_empty() {
            debug!(organisation, due = due.len(), fired = report.inserted, "report schedules fired");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportTask, Schedule, TaskPayload, TaskStatus};
    use crate::impls::InMemoryStore;
    use crate::ports::{ScheduleStore, TaskFilter, TaskStore, UlidGenerator};
    use crate::queue::QueueError;
    use crate::testing;
    use chrono::{Duration, Timelike};

    fn recipe(organisation: &str, recipe: &str) -> TaskPayload {
        TaskPayload::Report(ReportTask {
            organisation: organisation.into(),
            report_recipe_id: recipe.into(),
        })
    }

    fn fixture() -> (Arc<InMemoryStore>, Arc<Enqueuer>, ReportPopulator) {
        let clock = testing::clock();
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        let enqueuer = Arc::new(Enqueuer::new(store.clone(), ids, clock));
        let populator = ReportPopulator::new(enqueuer.clone(), DeadlineRanker::default());
        (store, enqueuer, populator)
    }

    async fn schedule(
        store: &InMemoryStore,
        enqueuer: &Enqueuer,
        recipe_id: &str,
        cron: Option<&str>,
        deadline_at: chrono::DateTime<chrono::Utc>,
    ) -> Schedule {
        let schedule = Schedule::new(
            enqueuer.ids().generate_schedule_id(),
            recipe("acme", recipe_id),
            cron.map(str::to_string),
            deadline_at,
            testing::start() - Duration::days(7),
        );
        store.create_schedule(schedule).await.unwrap()
    }

    #[tokio::test]
    async fn due_schedule_fires_and_deadline_moves_into_the_future() {
        let (store, enqueuer, populator) = fixture();
        let now = testing::start();
        let due = schedule(&store, &enqueuer, "weekly", Some("0 6 * * *"), now - Duration::minutes(5)).await;
        let queue = PriorityQueue::new("report-acme", 10);

        let report = populator.populate(&queue, "acme").await.unwrap();
        assert_eq!(report.inserted, 1);

        let item = queue.pop().unwrap();
        assert_eq!(item.priority, due.deadline_at.timestamp());

        let stored = store.get_schedule(due.id).await.unwrap().unwrap();
        assert!(stored.deadline_at > now);
        assert_eq!((stored.deadline_at.hour(), stored.deadline_at.minute()), (6, 0));

        let task = store.get_task(item.id).await.unwrap().unwrap();
        assert_eq!(task.schedule_id, Some(due.id));
        assert_eq!(task.status, TaskStatus::Queued);

        // nothing due any more
        assert_eq!(populator.populate(&queue, "acme").await.unwrap().inserted, 0);
    }

    #[tokio::test]
    async fn future_and_disabled_schedules_do_not_fire() {
        let (store, enqueuer, populator) = fixture();
        let now = testing::start();
        schedule(&store, &enqueuer, "weekly", None, now + Duration::hours(1)).await;
        let mut disabled =
            schedule(&store, &enqueuer, "monthly", None, now - Duration::hours(1)).await;
        disabled.enabled = false;
        store.update_schedule(&disabled).await.unwrap();
        let queue = PriorityQueue::new("report-acme", 10);

        let report = populator.populate(&queue, "acme").await.unwrap();
        assert_eq!(report, PopulateReport::default());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn full_queue_leaves_schedule_due_and_writes_no_task() {
        let (store, enqueuer, populator) = fixture();
        let now = testing::start();
        let due = schedule(&store, &enqueuer, "weekly", None, now - Duration::minutes(5)).await;
        let queue = PriorityQueue::new("report-acme", 1);
        queue
            .push(crate::queue::PrioritizedItem::new(
                enqueuer.ids().generate_task_id(),
                1,
                recipe("acme", "quarterly"),
            ))
            .unwrap();

        let err = populator.populate(&queue, "acme").await.unwrap_err();
        assert!(matches!(err, LoomError::Queue(QueueError::Full { .. })));

        let stored = store.get_schedule(due.id).await.unwrap().unwrap();
        assert_eq!(stored.deadline_at, due.deadline_at);
        assert_eq!(store.list_tasks(&TaskFilter::default()).await.unwrap().count, 0);
    }
}
