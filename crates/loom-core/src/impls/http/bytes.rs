//! Raw artifact store client.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::domain::{ExternalServiceError, RawArtifact, TaskKind};
use crate::ports::ArtifactStore;

use super::HttpService;

#[derive(Debug, Deserialize)]
struct LastRun {
    last_run: Option<DateTime<Utc>>,
}

pub struct BytesClient {
    service: HttpService,
}

impl BytesClient {
    pub fn new(service: HttpService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ArtifactStore for BytesClient {
    async fn get_last_run(
        &self,
        kind: TaskKind,
        plugin_id: &str,
        target: &str,
        organisation: &str,
    ) -> Result<Option<DateTime<Utc>>, ExternalServiceError> {
        let response: LastRun = self
            .service
            .get_json(
                "/bytes/last-run",
                &[
                    ("kind", kind.to_string()),
                    ("plugin_id", plugin_id.to_string()),
                    ("target", target.to_string()),
                    ("organisation", organisation.to_string()),
                ],
            )
            .await?;
        Ok(response.last_run)
    }

    async fn get_raw_artifacts(
        &self,
        organisation: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawArtifact>, ExternalServiceError> {
        let mut query = vec![("organisation", organisation.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Micros, true)));
        }
        self.service.get_json("/bytes/raw", &query).await
    }

    async fn health(&self) -> bool {
        self.service.is_healthy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RetryPolicy;
    use crate::impls::http::service::tests::serve;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn last_run_passes_identity_as_query() {
        let router = Router::new().route(
            "/bytes/last-run",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let seen = q.get("plugin_id").map(String::as_str) == Some("dns-records")
                    && q.get("kind").map(String::as_str) == Some("scan");
                let last_run = seen.then_some("2024-01-01T12:00:00Z");
                Json(serde_json::json!({ "last_run": last_run }))
            }),
        );
        let base = serve(router).await;
        let service =
            HttpService::new("bytes", base, Duration::from_secs(2), RetryPolicy::default()).unwrap();
        let client = BytesClient::new(service);

        let last_run = client
            .get_last_run(TaskKind::Scan, "dns-records", "Hostname|internet|a.example", "acme")
            .await
            .unwrap();
        assert_eq!(last_run.map(|t| t.timestamp()), Some(1_704_110_400));
    }
}
