//! Domain model (IDs, payloads, task/schedule records, status DAG, errors).

pub mod catalog;
pub mod errors;
pub mod events;
pub mod ids;
pub mod kind;
pub mod payload;
pub mod retry;
pub mod schedule;
pub mod state;
pub mod task;

pub use self::catalog::{Organisation, Plugin, PluginType, RawArtifact, Target};
pub use self::errors::{ErrorAction, ExternalServiceError, FilterError, LoomError, ValidationError};
pub use self::events::TaskEvent;
pub use self::ids::{ParseIdError, ScheduleId, TaskId};
pub use self::kind::TaskKind;
pub use self::payload::{NormalizationTask, ReportTask, ScanTask, TaskPayload};
pub use self::retry::RetryPolicy;
pub use self::schedule::{Schedule, parse_cron};
pub use self::state::{TaskStatus, TransitionError};
pub use self::task::Task;
