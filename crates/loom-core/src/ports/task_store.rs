//! TaskStore / ScheduleStore ports - タスクとスケジュールの正本（source of truth）
//!
//! # 設計原則
//! - 状態遷移・スケジュールの発火は同一トランザクション内（失敗したら全体をロールバック）
//! - Task の insert / status 変更は必ずイベントログに 1 行追加される
//! - 遷移は `TaskStatus` の DAG に従う（スキップ・逆行は `InvalidTransition`）
//!
//! # 実装
//! - `impls::InMemoryStore`（開発・テスト用）
//! - `impls::SqliteStore`（永続化）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::{
    Schedule, ScheduleId, Task, TaskEvent, TaskId, TaskKind, TaskStatus, TransitionError,
};

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("{0} already exists")]
    Conflict(String),
}

impl StoreError {
    pub fn task_not_found(id: TaskId) -> Self {
        StoreError::NotFound {
            entity: "task",
            id: id.to_string(),
        }
    }

    pub fn schedule_not_found(id: ScheduleId) -> Self {
        StoreError::NotFound {
            entity: "schedule",
            id: id.to_string(),
        }
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub count: usize,
    pub offset: usize,
    pub limit: usize,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFilter {
    pub scheduler_id: Option<String>,
    pub organisation: Option<String>,
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub hash: Option<String>,
    pub min_created_at: Option<DateTime<Utc>>,
    pub max_created_at: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            scheduler_id: None,
            organisation: None,
            status: None,
            kind: None,
            hash: None,
            min_created_at: None,
            max_created_at: None,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.scheduler_id.as_ref().is_none_or(|s| &task.scheduler_id == s)
            && self.organisation.as_ref().is_none_or(|o| &task.organisation == o)
            && self.status.is_none_or(|s| task.status == s)
            && self.kind.is_none_or(|k| task.kind == k)
            && self.hash.as_ref().is_none_or(|h| &task.hash == h)
            && self.min_created_at.is_none_or(|t| task.created_at >= t)
            && self.max_created_at.is_none_or(|t| task.created_at <= t)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleFilter {
    pub scheduler_id: Option<String>,
    pub organisation: Option<String>,
    pub enabled: Option<bool>,
    pub hash: Option<String>,
    pub min_deadline_at: Option<DateTime<Utc>>,
    pub max_deadline_at: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for ScheduleFilter {
    fn default() -> Self {
        Self {
            scheduler_id: None,
            organisation: None,
            enabled: None,
            hash: None,
            min_deadline_at: None,
            max_deadline_at: None,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ScheduleFilter {
    pub fn matches(&self, schedule: &Schedule) -> bool {
        self.scheduler_id.as_ref().is_none_or(|s| &schedule.scheduler_id == s)
            && self.organisation.as_ref().is_none_or(|o| &schedule.organisation == o)
            && self.enabled.is_none_or(|e| schedule.enabled == e)
            && self.hash.as_ref().is_none_or(|h| &schedule.hash == h)
            && self.min_deadline_at.is_none_or(|t| schedule.deadline_at >= t)
            && self.max_deadline_at.is_none_or(|t| schedule.deadline_at <= t)
    }
}

/// TaskStore は Task の状態と履歴（イベントログ）の正本
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task; logs the insert event.
    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Newest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Page<Task>, StoreError>;

    /// Most recently created task with `hash`.
    async fn latest_task_by_hash(&self, hash: &str) -> Result<Option<Task>, StoreError>;

    /// DAG-checked status change; logs the event in the same transaction.
    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError>;

    async fn update_priority(&self, id: TaskId, priority: i64) -> Result<Task, StoreError>;

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError>;
}

/// ScheduleStore は繰り返し実行の定義（削除せず無効化する）
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Fails with `Conflict` if a schedule with the same hash exists.
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError>;

    async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError>;

    async fn get_schedule_by_hash(&self, hash: &str) -> Result<Option<Schedule>, StoreError>;

    /// Newest first.
    async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Page<Schedule>, StoreError>;

    /// Persist mutable fields (enabled, cron, deadline, payload); bumps `modified_at`.
    async fn update_schedule(&self, schedule: &Schedule) -> Result<Schedule, StoreError>;

    /// Enabled schedules of `scheduler_id` with `deadline_at <= now`, earliest first.
    async fn due_schedules(
        &self,
        scheduler_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError>;

    /// One transaction: insert `task` (pending, linked to the schedule) and
    /// move the schedule's deadline to `next_deadline`.
    async fn fire_schedule(
        &self,
        schedule_id: ScheduleId,
        task: Task,
        next_deadline: DateTime<Utc>,
    ) -> Result<Task, StoreError>;
}

/// Both halves in one object; stores implement both.
pub trait Store: TaskStore + ScheduleStore {}

impl<T: TaskStore + ScheduleStore> Store for T {}
