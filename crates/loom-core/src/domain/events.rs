//! Events - タスクの append-only イベントログ
//!
//! Task の insert と status 変更はすべて同じトランザクション内で 1 行ずつ記録されます。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskStatus;

/// One entry of the task event log.
///
/// `old_status` is `None` for the insert event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub seq: u64,
    pub task_id: TaskId,
    pub at: DateTime<Utc>,
    pub old_status: Option<TaskStatus>,
    pub new_status: TaskStatus,
}

impl TaskEvent {
    pub fn is_insert(&self) -> bool {
        self.old_status.is_none()
    }
}
