//! ExecutionSink port - 実行系（boefje/normalizer runner）への受け渡し口
//!
//! submit が Ok を返したら sink が受理したということ。以後の状態は
//! `PATCH /tasks/{id}` のコールバックでのみ進みます。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExternalServiceError, TaskId, TaskPayload};

#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn submit(&self, task_id: TaskId, payload: &TaskPayload)
    -> Result<(), ExternalServiceError>;

    async fn health(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: ExecutionSink + ?Sized> ExecutionSink for Arc<S> {
    async fn submit(
        &self,
        task_id: TaskId,
        payload: &TaskPayload,
    ) -> Result<(), ExternalServiceError> {
        (**self).submit(task_id, payload).await
    }

    async fn health(&self) -> bool {
        (**self).health().await
    }
}
