//! In-memory TaskStore / ScheduleStore（開発・テスト用）
//!
//! すべての操作は 1 回のロック内で「検証 → 反映」の順に行うので、
//! 途中で失敗しても部分的な書き込みは残りません（トランザクション相当）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{Schedule, ScheduleId, Task, TaskEvent, TaskId, TaskStatus};
use crate::ports::{
    Clock, Page, ScheduleFilter, ScheduleStore, StoreError, TaskFilter, TaskStore,
};

#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    schedules: HashMap<ScheduleId, Schedule>,
    events: Vec<TaskEvent>,
    next_seq: u64,
}

impl StoreState {
    fn log(
        &mut self,
        task_id: TaskId,
        at: DateTime<Utc>,
        old_status: Option<TaskStatus>,
        new_status: TaskStatus,
    ) {
        self.next_seq += 1;
        self.events.push(TaskEvent {
            seq: self.next_seq,
            task_id,
            at,
            old_status,
            new_status,
        });
    }

    fn insert_task(&mut self, task: Task) -> Result<Task, StoreError> {
        if self.tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict(task.id.to_string()));
        }
        self.log(task.id, task.created_at, None, task.status);
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }
}

fn paginate<T>(matching: Vec<T>, offset: usize, limit: usize) -> Page<T> {
    let count = matching.len();
    let results = matching.into_iter().skip(offset).take(limit).collect();
    Page {
        count,
        offset,
        limit,
        results,
    }
}

pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(StoreState::default()),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        self.state.lock().await.insert_task(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Page<Task>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, filter.offset, filter.limit))
    }

    async fn latest_task_by_hash(&self, hash: &str) -> Result<Option<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .filter(|t| t.hash == hash)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::task_not_found(id))?;
        let old = task.transition(status, now)?;
        let updated = task.clone();
        state.log(id, now, Some(old), status);
        Ok(updated)
    }

    async fn update_priority(&self, id: TaskId, priority: i64) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::task_not_found(id))?;
        task.priority = priority;
        task.modified_at = now;
        Ok(task.clone())
    }

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.task_id == id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        let mut state = self.state.lock().await;
        if state.schedules.contains_key(&schedule.id)
            || state.schedules.values().any(|s| s.hash == schedule.hash)
        {
            return Err(StoreError::Conflict(format!("schedule for hash {}", schedule.hash)));
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        Ok(self.state.lock().await.schedules.get(&id).cloned())
    }

    async fn get_schedule_by_hash(&self, hash: &str) -> Result<Option<Schedule>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.schedules.values().find(|s| s.hash == hash).cloned())
    }

    async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Page<Schedule>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, filter.offset, filter.limit))
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<Schedule, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let stored = state
            .schedules
            .get_mut(&schedule.id)
            .ok_or_else(|| StoreError::schedule_not_found(schedule.id))?;
        stored.enabled = schedule.enabled;
        stored.cron_expression = schedule.cron_expression.clone();
        stored.deadline_at = schedule.deadline_at;
        stored.payload = schedule.payload.clone();
        stored.modified_at = now;
        Ok(stored.clone())
    }

    async fn due_schedules(
        &self,
        scheduler_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<Schedule> = state
            .schedules
            .values()
            .filter(|s| s.scheduler_id == scheduler_id && s.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.deadline_at.cmp(&b.deadline_at).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn fire_schedule(
        &self,
        schedule_id: ScheduleId,
        task: Task,
        next_deadline: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if !state.schedules.contains_key(&schedule_id) {
            return Err(StoreError::schedule_not_found(schedule_id));
        }
        let task = state.insert_task(task.with_schedule(schedule_id))?;
        if let Some(schedule) = state.schedules.get_mut(&schedule_id) {
            schedule.deadline_at = next_deadline;
            schedule.modified_at = now;
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ReportTask, ScanTask, TaskPayload};
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (Arc<FixedClock>, InMemoryStore) {
        let clock = Arc::new(FixedClock::new(start()));
        let store = InMemoryStore::new(clock.clone());
        (clock, store)
    }

    fn scan_task(org: &str, ooi: &str, at: DateTime<Utc>) -> Task {
        let payload = TaskPayload::Scan(ScanTask {
            organisation: org.into(),
            plugin_id: "dns-records".into(),
            plugin_version: None,
            input_ooi: Some(ooi.into()),
        });
        Task::new(TaskId::from_ulid(Ulid::new()), payload, 2, at)
    }

    fn report_schedule(deadline_at: DateTime<Utc>) -> Schedule {
        let payload = TaskPayload::Report(ReportTask {
            organisation: "acme".into(),
            report_recipe_id: "weekly".into(),
        });
        Schedule::new(
            ScheduleId::from_ulid(Ulid::new()),
            payload,
            None,
            deadline_at,
            start(),
        )
    }

    #[tokio::test]
    async fn lifecycle_rejects_skipped_states() {
        let (_clock, store) = store();
        let task = store
            .create_task(scan_task("acme", "Hostname|internet|a.example", start()))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let err = store
            .update_status(task.id, TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        assert_eq!(
            store.get_task(task.id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );

        store.update_status(task.id, TaskStatus::Queued).await.unwrap();
        let dispatched = store
            .update_status(task.id, TaskStatus::Dispatched)
            .await
            .unwrap();
        assert_eq!(dispatched.status, TaskStatus::Dispatched);
    }

    #[tokio::test]
    async fn event_log_records_insert_and_every_transition() {
        let (clock, store) = store();
        let task = store
            .create_task(scan_task("acme", "Hostname|internet|a.example", start()))
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));
        store.update_status(task.id, TaskStatus::Queued).await.unwrap();
        let _ = store.update_status(task.id, TaskStatus::Running).await;

        let events = store.task_events(task.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_insert());
        assert_eq!(events[1].old_status, Some(TaskStatus::Pending));
        assert_eq!(events[1].new_status, TaskStatus::Queued);
        assert_eq!(events[1].at, start() + Duration::seconds(5));
        assert!(events[0].seq < events[1].seq);
    }

    #[tokio::test]
    async fn list_filters_and_paginates_newest_first() {
        let (_clock, store) = store();
        for i in 0..5 {
            let at = start() + Duration::minutes(i);
            store
                .create_task(scan_task("acme", &format!("Hostname|internet|{i}.example"), at))
                .await
                .unwrap();
        }
        store
            .create_task(scan_task("beta", "Hostname|internet|b.example", start()))
            .await
            .unwrap();

        let filter = TaskFilter {
            organisation: Some("acme".into()),
            min_created_at: Some(start() + Duration::minutes(1)),
            offset: 1,
            limit: 2,
            ..TaskFilter::default()
        };
        let page = store.list_tasks(&filter).await.unwrap();

        assert_eq!(page.count, 4);
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].created_at, start() + Duration::minutes(3));
        assert_eq!(page.results[1].created_at, start() + Duration::minutes(2));
    }

    #[tokio::test]
    async fn latest_task_by_hash_returns_newest() {
        let (_clock, store) = store();
        let first = scan_task("acme", "Hostname|internet|a.example", start());
        let hash = first.hash.clone();
        store.create_task(first).await.unwrap();
        let second = store
            .create_task(scan_task(
                "acme",
                "Hostname|internet|a.example",
                start() + Duration::hours(1),
            ))
            .await
            .unwrap();

        let latest = store.latest_task_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn fire_schedule_links_task_and_moves_deadline() {
        let (clock, store) = store();
        let schedule = store
            .create_schedule(report_schedule(start() + Duration::minutes(1)))
            .await
            .unwrap();
        clock.advance(Duration::minutes(2));

        let due = store
            .due_schedules("report-acme", clock.now())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);

        let task = Task::new(
            TaskId::from_ulid(Ulid::new()),
            schedule.payload.clone(),
            schedule.deadline_at.timestamp(),
            clock.now(),
        );
        let next = clock.now() + Duration::days(1);
        let fired = store.fire_schedule(schedule.id, task, next).await.unwrap();

        assert_eq!(fired.schedule_id, Some(schedule.id));
        let stored = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.deadline_at, next);
        assert!(
            store
                .due_schedules("report-acme", clock.now())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn failed_firing_leaves_no_partial_state() {
        let (clock, store) = store();
        let schedule = store
            .create_schedule(report_schedule(start() + Duration::minutes(1)))
            .await
            .unwrap();
        let existing = store
            .create_task(Task::new(
                TaskId::from_ulid(Ulid::new()),
                schedule.payload.clone(),
                1,
                clock.now(),
            ))
            .await
            .unwrap();

        // same task id again -> conflict, deadline untouched
        let result = store
            .fire_schedule(schedule.id, existing.clone(), clock.now() + Duration::days(1))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        let stored = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.deadline_at, schedule.deadline_at);
    }

    #[tokio::test]
    async fn schedules_are_unique_per_hash_and_can_be_disabled() {
        let (_clock, store) = store();
        let schedule = store
            .create_schedule(report_schedule(start() + Duration::hours(1)))
            .await
            .unwrap();
        assert!(matches!(
            store
                .create_schedule(report_schedule(start() + Duration::hours(2)))
                .await,
            Err(StoreError::Conflict(_))
        ));

        let mut disabled = schedule.clone();
        disabled.enabled = false;
        store.update_schedule(&disabled).await.unwrap();

        let page = store
            .list_schedules(&ScheduleFilter {
                enabled: Some(false),
                ..ScheduleFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 1);
        assert!(
            store
                .due_schedules("report-acme", start() + Duration::days(2))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
