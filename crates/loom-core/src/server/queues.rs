//! /queues routes: inspection and operator push.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::app::EnqueueOutcome;
use crate::domain::{TaskId, TaskKind, TaskPayload, ValidationError};
use crate::ports::MAX_LIMIT;
use crate::queue::{PrioritizedItem, PriorityQueue, QueueKey};

use super::AppState;
use super::error::ApiError;
use super::query::Params;

const DEFAULT_PEEK: usize = 10;

#[derive(Debug, Serialize)]
pub struct QueueSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub organisation: String,
    pub size: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueView {
    #[serde(flatten)]
    pub summary: QueueSummary,
    pub items: Vec<PrioritizedItem>,
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub payload: TaskPayload,
    pub priority: i64,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

fn summary(key: &QueueKey, queue: &PriorityQueue) -> QueueSummary {
    QueueSummary {
        id: queue.id().to_string(),
        kind: key.kind,
        organisation: key.organisation.clone(),
        size: queue.len(),
        capacity: queue.capacity(),
    }
}

fn lookup(state: &AppState, id: &str) -> Result<(QueueKey, std::sync::Arc<PriorityQueue>), ApiError> {
    QueueKey::parse(id)
        .and_then(|key| state.queues.get(&key).map(|queue| (key, queue)))
        .ok_or_else(|| ApiError::not_found("queue", id))
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<QueueSummary>> {
    let summaries = state
        .queues
        .all()
        .iter()
        .filter_map(|queue| QueueKey::parse(queue.id()).map(|key| summary(&key, queue)))
        .collect();
    Json(summaries)
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<QueueView>, ApiError> {
    let n = Params::new(raw)
        .parse::<usize>("n")?
        .unwrap_or(DEFAULT_PEEK)
        .min(MAX_LIMIT);
    let (key, queue) = lookup(&state, &id)?;
    Ok(Json(QueueView {
        summary: summary(&key, &queue),
        items: queue.peek(n),
    }))
}

pub async fn push(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PushRequest>,
) -> Result<(StatusCode, Json<PushResponse>), ApiError> {
    let (_, queue) = lookup(&state, &id)?;
    if body.payload.scheduler_id() != queue.id() {
        return Err(ValidationError::new(format!(
            "payload belongs to `{}`, not `{}`",
            body.payload.scheduler_id(),
            queue.id()
        ))
        .into());
    }

    let outcome = state.enqueuer.enqueue(&queue, body.payload, body.priority).await?;
    let response = match outcome {
        EnqueueOutcome::Inserted(task) => (
            StatusCode::CREATED,
            PushResponse {
                outcome: "inserted",
                task_id: Some(task.id),
            },
        ),
        EnqueueOutcome::Updated { task_id, .. } => (
            StatusCode::OK,
            PushResponse {
                outcome: "updated",
                task_id: Some(task_id),
            },
        ),
        EnqueueOutcome::Unchanged => (
            StatusCode::OK,
            PushResponse {
                outcome: "unchanged",
                task_id: None,
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}
