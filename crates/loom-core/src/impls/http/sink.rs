//! Execution sink client: hands payloads to the runner service.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{ExternalServiceError, TaskId, TaskPayload};
use crate::ports::ExecutionSink;

use super::HttpService;

#[derive(Serialize)]
struct Submission<'a> {
    id: TaskId,
    payload: &'a TaskPayload,
}

pub struct HttpExecutionSink {
    service: HttpService,
}

impl HttpExecutionSink {
    pub fn new(service: HttpService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ExecutionSink for HttpExecutionSink {
    async fn submit(
        &self,
        task_id: TaskId,
        payload: &TaskPayload,
    ) -> Result<(), ExternalServiceError> {
        self.service
            .post_json("/tasks", &Submission { id: task_id, payload })
            .await
    }

    async fn health(&self) -> bool {
        self.service.is_healthy().await
    }
}
