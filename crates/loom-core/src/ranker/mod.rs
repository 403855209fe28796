//! Rankers: pure priority strategies, one per task kind.
//!
//! Lower numbers are more urgent. [`NOT_ELIGIBLE`] tells the populator to
//! leave the candidate out of this cycle.

mod deadline;
mod scan;

pub use deadline::DeadlineRanker;
pub use scan::ScanRanker;

use crate::domain::RawArtifact;

/// Candidate must not be enqueued yet.
pub const NOT_ELIGIBLE: i64 = -1;

/// Priority of a scan target that never ran.
pub const NEVER_RUN_PRIORITY: i64 = 2;

/// Normalization tasks: oldest raw data first.
pub fn rank_normalization(raw: &RawArtifact) -> i64 {
    raw.produced_at.timestamp()
}
