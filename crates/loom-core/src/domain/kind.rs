//! Task kinds scheduled by the core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of work a scheduler owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Probe a target with a scan plugin ("boefje").
    Scan,
    /// Parse raw findings into structured objects.
    Normalization,
    /// Produce a report from a recipe.
    Report,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Scan, TaskKind::Normalization, TaskKind::Report];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Scan => "scan",
            TaskKind::Normalization => "normalization",
            TaskKind::Report => "report",
        }
    }

    /// `"{kind}-{organisation}"`, used both as scheduler id and queue id.
    pub fn scheduler_id(self, organisation: &str) -> String {
        format!("{}-{}", self.as_str(), organisation)
    }

    /// Split a scheduler id back into kind and organisation.
    pub fn parse_scheduler_id(id: &str) -> Option<(TaskKind, &str)> {
        let (kind, organisation) = id.split_once('-')?;
        let kind = kind.parse().ok()?;
        (!organisation.is_empty()).then_some((kind, organisation))
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task kind `{s}`"))
    }
}
