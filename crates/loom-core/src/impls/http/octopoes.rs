//! Object store client.

use async_trait::async_trait;

use crate::domain::{ExternalServiceError, Target};
use crate::ports::ObjectStore;

use super::HttpService;

pub struct OctopoesClient {
    service: HttpService,
}

impl OctopoesClient {
    pub fn new(service: HttpService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ObjectStore for OctopoesClient {
    async fn get_scan_candidates(
        &self,
        organisation: &str,
        scan_level: u8,
    ) -> Result<Vec<Target>, ExternalServiceError> {
        self.service
            .get_json(
                &format!("/{organisation}/scan-candidates"),
                &[("scan_level", scan_level.to_string())],
            )
            .await
    }

    async fn health(&self) -> bool {
        self.service.is_healthy().await
    }
}
