//! ArtifactStore port - 生データ（raw artifact）の保存先
//!
//! - 過去の実行時刻（ScanRanker の入力）
//! - まだ正規化されていない raw data（normalization の候補）

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ExternalServiceError, RawArtifact, TaskKind};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// When `plugin_id` last finished against `target` for `organisation`.
    async fn get_last_run(
        &self,
        kind: TaskKind,
        plugin_id: &str,
        target: &str,
        organisation: &str,
    ) -> Result<Option<DateTime<Utc>>, ExternalServiceError>;

    /// Raw artifacts produced strictly after `since`, oldest first.
    async fn get_raw_artifacts(
        &self,
        organisation: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawArtifact>, ExternalServiceError>;

    async fn health(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: ArtifactStore + ?Sized> ArtifactStore for Arc<S> {
    async fn get_last_run(
        &self,
        kind: TaskKind,
        plugin_id: &str,
        target: &str,
        organisation: &str,
    ) -> Result<Option<DateTime<Utc>>, ExternalServiceError> {
        (**self)
            .get_last_run(kind, plugin_id, target, organisation)
            .await
    }

    async fn get_raw_artifacts(
        &self,
        organisation: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawArtifact>, ExternalServiceError> {
        (**self).get_raw_artifacts(organisation, since).await
    }

    async fn health(&self) -> bool {
        (**self).health().await
    }
}
