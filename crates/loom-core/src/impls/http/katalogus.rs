//! Plugin registry client.

use async_trait::async_trait;

use crate::domain::{ExternalServiceError, Organisation, Plugin};
use crate::ports::PluginCatalog;

use super::HttpService;

pub struct KatalogusClient {
    service: HttpService,
}

impl KatalogusClient {
    pub fn new(service: HttpService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PluginCatalog for KatalogusClient {
    async fn list_organisations(&self) -> Result<Vec<Organisation>, ExternalServiceError> {
        self.service.get_json("/v1/organisations", &[]).await
    }

    async fn get_enabled_plugins(
        &self,
        organisation: &str,
    ) -> Result<Vec<Plugin>, ExternalServiceError> {
        let plugins: Vec<Plugin> = self
            .service
            .get_json(
                &format!("/v1/organisations/{organisation}/plugins"),
                &[("enabled", "true".to_string())],
            )
            .await?;
        Ok(plugins.into_iter().filter(|p| p.enabled).collect())
    }

    async fn health(&self) -> bool {
        self.service.is_healthy().await
    }
}
