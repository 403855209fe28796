//! /health and scheduler switches.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use crate::app::{Alert, SchedulerStatus};
use crate::domain::TaskKind;

use super::AppState;
use super::error::ApiError;

#[derive(Debug, Serialize)]
pub struct Health {
    pub healthy: bool,
    pub collaborators: BTreeMap<&'static str, bool>,
    pub schedulers: BTreeMap<TaskKind, SchedulerStatus>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
pub struct SwitchResponse {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub enabled: bool,
    pub cancelled: usize,
}

/// Liveness plus collaborator health. Always 200 while the process serves.
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let collaborators = state.collaborators.health().await;
    Json(Health {
        healthy: collaborators.values().all(|ok| *ok),
        collaborators,
        schedulers: state.status.schedulers(),
        alerts: state.status.alerts(),
    })
}

fn parse_kind(raw: &str) -> Result<TaskKind, ApiError> {
    raw.parse::<TaskKind>()
        .map_err(|_| ApiError::not_found("scheduler", raw))
}

pub async fn enable(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<SwitchResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    state.control.enable(kind);
    Ok(Json(SwitchResponse {
        kind,
        enabled: true,
        cancelled: 0,
    }))
}

pub async fn disable(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<SwitchResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let cancelled = state.control.disable(kind).await;
    Ok(Json(SwitchResponse {
        kind,
        enabled: false,
        cancelled,
    }))
}
