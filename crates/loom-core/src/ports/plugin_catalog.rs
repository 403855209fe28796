//! PluginCatalog port - プラグインレジストリ（どのプラグインが組織ごとに有効か）

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExternalServiceError, Organisation, Plugin};

#[async_trait]
pub trait PluginCatalog: Send + Sync {
    async fn list_organisations(&self) -> Result<Vec<Organisation>, ExternalServiceError>;

    /// Plugins enabled for `organisation` (boefjes and normalizers).
    async fn get_enabled_plugins(
        &self,
        organisation: &str,
    ) -> Result<Vec<Plugin>, ExternalServiceError>;

    /// Drop cached responses. Implementations without a cache ignore this.
    async fn flush_cache(&self) {}

    async fn health(&self) -> bool {
        true
    }
}

#[async_trait]
impl<C: PluginCatalog + ?Sized> PluginCatalog for Arc<C> {
    async fn list_organisations(&self) -> Result<Vec<Organisation>, ExternalServiceError> {
        (**self).list_organisations().await
    }

    async fn get_enabled_plugins(
        &self,
        organisation: &str,
    ) -> Result<Vec<Plugin>, ExternalServiceError> {
        (**self).get_enabled_plugins(organisation).await
    }

    async fn flush_cache(&self) {
        (**self).flush_cache().await
    }

    async fn health(&self) -> bool {
        (**self).health().await
    }
}
