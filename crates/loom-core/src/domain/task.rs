//! Task record: one issued unit of work and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ScheduleId, TaskId};
use super::kind::TaskKind;
use super::payload::TaskPayload;
use super::state::{TaskStatus, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub scheduler_id: String,
    pub schedule_id: Option<ScheduleId>,
    pub organisation: String,
    pub priority: i64,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub hash: String,
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Task {
    /// A fresh `pending` task for `payload`.
    pub fn new(id: TaskId, payload: TaskPayload, priority: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            scheduler_id: payload.scheduler_id(),
            schedule_id: None,
            organisation: payload.organisation().to_string(),
            priority,
            status: TaskStatus::Pending,
            kind: payload.kind(),
            hash: payload.hash(),
            payload,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_schedule(mut self, schedule_id: ScheduleId) -> Self {
        self.schedule_id = Some(schedule_id);
        self
    }

    /// Move to `to`, returning the previous status.
    pub fn transition(
        &mut self,
        to: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, TransitionError> {
        let from = self.status;
        self.status = from.transition(to)?;
        self.modified_at = now;
        Ok(from)
    }
}
