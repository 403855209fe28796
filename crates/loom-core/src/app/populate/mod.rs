//! Populators - 種類ごとの候補収集
//!
//! Scheduler は組織ごとに `populate` を呼ぶだけで、候補の集め方・順位付けは
//! ここの実装が持ちます。
//!
//! - **ScanPopulator**: 有効な boefje × スキャン対象
//! - **NormalizationPopulator**: 新しい raw data × 有効な normalizer
//! - **ReportPopulator**: 期限の来た Schedule の発火

mod normalization;
mod report;
mod scan;

pub use self::normalization::NormalizationPopulator;
pub use self::report::ReportPopulator;
pub use self::scan::ScanPopulator;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::domain::{ErrorAction, LoomError, TaskKind};
use crate::ports::StoreError;
use crate::queue::PriorityQueue;

use super::enqueue::EnqueueOutcome;

/// Counts of one population pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

impl PopulateReport {
    pub fn record(&mut self, outcome: &EnqueueOutcome) {
        match outcome {
            EnqueueOutcome::Inserted(_) => self.inserted += 1,
            EnqueueOutcome::Updated { .. } => self.updated += 1,
            EnqueueOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    /// Account for a candidate that failed on its own.
    ///
    /// Queue errors, storage failures and aborts end the pass and are handed
    /// back; anything else drops the candidate and the pass goes on.
    pub fn skip_failed(&mut self, queue_id: &str, error: LoomError) -> Result<(), LoomError> {
        match (&error, error.action()) {
            (LoomError::Queue(_), _)
            | (LoomError::Store(StoreError::Storage(_)), _)
            | (_, ErrorAction::Abort) => Err(error),
            _ => {
                warn!(queue_id, error = %error, "dropping candidate");
                self.skip();
                Ok(())
            }
        }
    }
}

#[async_trait]
pub trait Populator: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// One pass for `organisation`, pushing into its queue.
    ///
    /// `QueueFull` ends the pass early; everything pushed before stays queued.
    /// A candidate that fails on its own is dropped and counted as skipped.
    async fn populate(
        &self,
        queue: &PriorityQueue,
        organisation: &str,
    ) -> Result<PopulateReport, LoomError>;
}
