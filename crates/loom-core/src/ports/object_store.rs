//! ObjectStore port - グラフストア（スキャン対象の候補を返す）

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExternalServiceError, Target};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Targets of `organisation` cleared for at least `scan_level`.
    async fn get_scan_candidates(
        &self,
        organisation: &str,
        scan_level: u8,
    ) -> Result<Vec<Target>, ExternalServiceError>;

    async fn health(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get_scan_candidates(
        &self,
        organisation: &str,
        scan_level: u8,
    ) -> Result<Vec<Target>, ExternalServiceError> {
        (**self).get_scan_candidates(organisation, scan_level).await
    }

    async fn health(&self) -> bool {
        (**self).health().await
    }
}
