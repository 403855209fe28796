//! /tasks routes: listing, status callbacks, event log.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{FilterError, Task, TaskEvent, TaskId, TaskStatus};
use crate::ports::{Page, TaskStore};

use super::AppState;
use super::error::ApiError;
use super::query::Params;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusUpdate {
    pub ids: Vec<TaskId>,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) fn parse_task_id(raw: &str) -> Result<TaskId, FilterError> {
    raw.parse()
        .map_err(|e| FilterError::new("id", format!("`{raw}`: {e}")))
}

pub async fn list(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<Task>>, ApiError> {
    let filter = Params::new(raw).task_filter()?;
    Ok(Json(state.store.list_tasks(&filter).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    let task = state
        .store
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::not_found("task", id.to_string()))?;
    Ok(Json(task))
}

pub async fn patch_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Ok(Json(update_status(&state, id, update.status).await?))
}

pub async fn patch_many(
    State(state): State<AppState>,
    Json(update): Json<BulkStatusUpdate>,
) -> Json<Vec<BulkResult>> {
    let mut results = Vec::with_capacity(update.ids.len());
    for id in update.ids {
        let result = match update_status(&state, id, update.status).await {
            Ok(task) => BulkResult {
                id,
                task: Some(task),
                error: None,
            },
            Err(e) => BulkResult {
                id,
                task: None,
                error: Some(e.0.to_string()),
            },
        };
        results.push(result);
    }
    Json(results)
}

pub async fn events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskEvent>>, ApiError> {
    let id = parse_task_id(&id)?;
    if state.store.get_task(id).await?.is_none() {
        return Err(ApiError::not_found("task", id.to_string()));
    }
    Ok(Json(state.store.task_events(id).await?))
}

/// DAG-checked status change. A task that leaves the queued state by hand
/// also leaves its queue.
async fn update_status(state: &AppState, id: TaskId, status: TaskStatus) -> Result<Task, ApiError> {
    let task = state.store.update_status(id, status).await?;
    if status.is_terminal() {
        if let Some(queue) = state.queues.get_by_id(&task.scheduler_id) {
            if queue.get(&task.hash).is_some_and(|item| item.id == id) {
                queue.remove(&task.hash);
            }
        }
    }
    info!(task_id = %id, %status, "task status updated");
    Ok(task)
}
