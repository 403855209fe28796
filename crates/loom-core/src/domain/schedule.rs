//! Schedule: a recurring definition of work.
//!
//! Schedules are disabled, never deleted, so the audit trail of firings stays intact.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::ids::ScheduleId;
use super::payload::TaskPayload;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub scheduler_id: String,
    pub organisation: String,
    pub hash: String,
    pub payload: TaskPayload,
    pub enabled: bool,
    pub cron_expression: Option<String>,
    pub deadline_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        id: ScheduleId,
        payload: TaskPayload,
        cron_expression: Option<String>,
        deadline_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            scheduler_id: payload.scheduler_id(),
            organisation: payload.organisation().to_string(),
            hash: payload.hash(),
            payload,
            enabled: true,
            cron_expression,
            deadline_at,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.deadline_at <= now
    }

    pub fn cron(&self) -> Result<Option<cron::Schedule>, ValidationError> {
        self.cron_expression.as_deref().map(parse_cron).transpose()
    }
}

/// Parse a cron expression.
///
/// Standard 5-field expressions (`min hour dom mon dow`) get a leading
/// seconds field so they fit the 6/7-field grammar of the `cron` crate.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, ValidationError> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| ValidationError::new(format!("invalid cron expression `{expr}`: {e}")))
}
