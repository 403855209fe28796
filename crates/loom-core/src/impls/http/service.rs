//! HttpService - 外部サービス呼び出しの共通部分（timeout + 上限付き指数バックオフ）
//!
//! - 接続エラー / 5xx / 408 / 429 はリトライ
//! - それ以外の 4xx は即座に失敗（リクエスト自体が間違っている）
//! - リトライ上限に達したら `ExternalServiceError`

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::domain::{ExternalServiceError, RetryPolicy};

#[derive(Debug, Clone)]
pub struct HttpService {
    name: String,
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl HttpService {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ExternalServiceError> {
        let name = name.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalServiceError::new(&name, 0, format!("build client: {e}")))?;
        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn error(&self, attempts: u32, message: impl Into<String>) -> ExternalServiceError {
        ExternalServiceError::new(&self.name, attempts, message)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExternalServiceError> {
        let url = self.url(path);
        let (response, attempts) = self
            .send_with_retry(|| self.client.get(&url).query(query))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| self.error(attempts, format!("decode response from {url}: {e}")))
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ExternalServiceError> {
        let url = self.url(path);
        self.send_with_retry(|| self.client.post(&url).json(body))
            .await
            .map(|_| ())
    }

    /// Single probe of `GET /health`, no retries.
    pub async fn is_healthy(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<(Response, u32), ExternalServiceError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let failure = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok((response, attempts)),
                Ok(response) if !is_retryable(response.status()) => {
                    return Err(self.error(
                        attempts,
                        format!("request rejected with status {}", response.status()),
                    ));
                }
                Ok(response) => format!("status {}", response.status()),
                Err(e) => e.to_string(),
            };

            if !self.retry.should_retry(attempts) {
                return Err(self.error(attempts, failure));
            }
            let delay = self.retry.next_delay(attempts);
            warn!(
                service = %self.name,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "collaborator call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}
