//! Normalization population: new raw data for every normalizer that reads it.
//!
//! 組織ごとにカーソル（最後に見た produced_at）を持ち、バッチ全体が
//! 処理できたときだけ進めます。途中で失敗したら次の周期で同じ範囲を読み直します。
//!
//! カーソルはメモリ上にしかないので、組織を初めて扱うときに store にある
//! 最新の normalization Task の raw data から復元します（再起動後の再処理を防ぐ）。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::enqueue::{EnqueueOutcome, Enqueuer};
use crate::domain::{
    LoomError, NormalizationTask, Plugin, PluginType, RawArtifact, TaskKind, TaskPayload,
};
use crate::ports::{ArtifactStore, PluginCatalog, StoreError, TaskFilter, TaskStore};
use crate::queue::PriorityQueue;
use crate::ranker::rank_normalization;

use super::{PopulateReport, Populator};

pub struct NormalizationPopulator {
    catalog: Arc<dyn PluginCatalog>,
    artifacts: Arc<dyn ArtifactStore>,
    enqueuer: Arc<Enqueuer>,
    /// An entry means the organisation's cursor was already restored.
    cursors: Mutex<HashMap<String, Option<DateTime<Utc>>>>,
}

impl NormalizationPopulator {
    pub fn new(
        catalog: Arc<dyn PluginCatalog>,
        artifacts: Arc<dyn ArtifactStore>,
        enqueuer: Arc<Enqueuer>,
    ) -> Self {
        Self {
            catalog,
            artifacts,
            enqueuer,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn cursor(&self, organisation: &str) -> Option<DateTime<Utc>> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(organisation)
            .copied()
            .flatten()
    }

    fn advance(&self, organisation: &str, to: DateTime<Utc>) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(organisation.to_string()).or_insert(Some(to));
        *cursor = (*cursor).max(Some(to));
    }

    /// The in-memory cursor, restored from the store on first use.
    async fn load_cursor(&self, organisation: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let known = self
            .cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(organisation)
            .copied();
        if let Some(cursor) = known {
            return Ok(cursor);
        }

        let filter = TaskFilter {
            kind: Some(TaskKind::Normalization),
            organisation: Some(organisation.to_string()),
            ..TaskFilter::default()
        };
        let restored = self
            .enqueuer
            .store()
            .list_tasks(&filter)
            .await?
            .results
            .into_iter()
            .filter_map(|task| match task.payload {
                TaskPayload::Normalization(t) => Some(t.raw_data.produced_at),
                _ => None,
            })
            .max();
        if let Some(at) = restored {
            debug!(organisation, cursor = %at, "normalization cursor restored");
        }

        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = *cursors.entry(organisation.to_string()).or_insert(restored);
        Ok(cursor)
    }

    /// Enqueue `raw` for `plugin`. `None` when the hash is already in flight.
    async fn candidate(
        &self,
        queue: &PriorityQueue,
        plugin: &Plugin,
        raw: &RawArtifact,
        organisation: &str,
    ) -> Result<Option<EnqueueOutcome>, LoomError> {
        let payload = TaskPayload::Normalization(NormalizationTask {
            organisation: organisation.to_string(),
            plugin_id: plugin.id.clone(),
            raw_data: raw.clone(),
        });
        if self.enqueuer.in_flight(&payload.hash()).await? {
            return Ok(None);
        }
        let outcome = self
            .enqueuer
            .enqueue(queue, payload, rank_normalization(raw))
            .await?;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl Populator for NormalizationPopulator {
    fn kind(&self) -> TaskKind {
        TaskKind::Normalization
    }

    async fn populate(
        &self,
        queue: &PriorityQueue,
        organisation: &str,
    ) -> Result<PopulateReport, LoomError> {
        let mut report = PopulateReport::default();

        let normalizers: Vec<Plugin> = self
            .catalog
            .get_enabled_plugins(organisation)
            .await?
            .into_iter()
            .filter(|p| p.plugin_type == PluginType::Normalizer && p.enabled)
            .collect();

        let since = self.load_cursor(organisation).await?;
        let raws = self.artifacts.get_raw_artifacts(organisation, since).await?;
        let Some(newest) = raws.iter().map(|r| r.produced_at).max() else {
            return Ok(report);
        };

        for raw in &raws {
            if raw.is_error() {
                report.skip();
                continue;
            }
            for plugin in normalizers.iter().filter(|p| p.can_normalize(raw)) {
                match self.candidate(queue, plugin, raw, organisation).await {
                    Ok(Some(outcome)) => report.record(&outcome),
                    Ok(None) => report.skip(),
                    Err(e) => report.skip_failed(queue.id(), e)?,
                }
            }
        }

        self.advance(organisation, newest);
        debug!(
            organisation,
            raws = raws.len(),
            inserted = report.inserted,
            cursor = %newest,
            "normalization population done"
        );
        Ok(report)
    }
}
