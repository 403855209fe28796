//! Status - ランタイムの状態ボード
//!
//! - Scheduler ごとの状態（stopped / running / stopping）と有効・無効フラグ
//! - 直近のアラート（dispatch を諦めたタスクなど）
//!
//! `GET /health` がこれをそのまま返します。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::domain::{TaskId, TaskKind};

const MAX_ALERTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub at: DateTime<Utc>,
    pub scheduler_id: String,
    pub task_id: Option<TaskId>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub enabled: bool,
}

pub struct StatusBoard {
    states: Mutex<HashMap<TaskKind, SchedulerState>>,
    enabled: HashMap<TaskKind, AtomicBool>,
    alerts: Mutex<VecDeque<Alert>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(
                TaskKind::ALL
                    .into_iter()
                    .map(|kind| (kind, SchedulerState::Stopped))
                    .collect(),
            ),
            enabled: TaskKind::ALL
                .into_iter()
                .map(|kind| (kind, AtomicBool::new(true)))
                .collect(),
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_state(&self, kind: TaskKind, state: SchedulerState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, state);
    }

    pub fn state(&self, kind: TaskKind) -> SchedulerState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
            .unwrap_or(SchedulerState::Stopped)
    }

    pub fn is_enabled(&self, kind: TaskKind) -> bool {
        self.enabled
            .get(&kind)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Returns the previous value.
    pub fn set_enabled(&self, kind: TaskKind, enabled: bool) -> bool {
        self.enabled
            .get(&kind)
            .is_some_and(|flag| flag.swap(enabled, Ordering::SeqCst))
    }

    pub fn schedulers(&self) -> BTreeMap<TaskKind, SchedulerStatus> {
        TaskKind::ALL
            .into_iter()
            .map(|kind| {
                let status = SchedulerStatus {
                    state: self.state(kind),
                    enabled: self.is_enabled(kind),
                };
                (kind, status)
            })
            .collect()
    }

    /// Log at `error` and keep the alert for `GET /health`.
    pub fn raise(&self, alert: Alert) {
        error!(
            scheduler_id = %alert.scheduler_id,
            task_id = ?alert.task_id.map(|id| id.to_string()),
            "{}",
            alert.message
        );
        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        if alerts.len() == MAX_ALERTS {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    /// Most recent first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedulers_start_stopped_and_enabled() {
        let board = StatusBoard::new();
        for (kind, status) in board.schedulers() {
            assert_eq!(status.state, SchedulerState::Stopped, "{kind}");
            assert!(status.enabled);
        }

        assert!(board.set_enabled(TaskKind::Scan, false));
        assert!(!board.is_enabled(TaskKind::Scan));
        assert!(board.is_enabled(TaskKind::Report));
    }

    #[test]
    fn alerts_are_bounded_and_newest_first() {
        let board = StatusBoard::new();
        for n in 0..(MAX_ALERTS + 5) {
            board.raise(Alert {
                at: Utc::now(),
                scheduler_id: "scan-acme".into(),
                task_id: None,
                message: format!("alert {n}"),
            });
        }
        let alerts = board.alerts();
        assert_eq!(alerts.len(), MAX_ALERTS);
        assert_eq!(alerts[0].message, format!("alert {}", MAX_ALERTS + 4));
    }
}
