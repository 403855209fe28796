//! /schedules routes.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::domain::{
    FilterError, Schedule, ScheduleId, TaskPayload, ValidationError, parse_cron,
};
use crate::ports::{Page, ScheduleStore};

use super::AppState;
use super::error::ApiError;
use super::query::Params;

#[derive(Debug, Deserialize)]
pub struct NewSchedule {
    pub scheduler_id: String,
    pub payload: TaskPayload,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub deadline_at: Option<DateTime<Utc>>,
}

/// `cron_expression: ""` removes the cron expression.
#[derive(Debug, Deserialize)]
pub struct SchedulePatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub cron_expression: Option<String>,
}

fn parse_schedule_id(raw: &str) -> Result<ScheduleId, FilterError> {
    raw.parse()
        .map_err(|e| FilterError::new("id", format!("`{raw}`: {e}")))
}

pub async fn list(
    State(state): State<AppState>,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Page<Schedule>>, ApiError> {
    let filter = Params::new(raw).schedule_filter()?;
    Ok(Json(state.store.list_schedules(&filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<NewSchedule>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    body.payload.validate()?;
    if body.payload.scheduler_id() != body.scheduler_id {
        return Err(ValidationError::new(format!(
            "payload belongs to `{}`, not `{}`",
            body.payload.scheduler_id(),
            body.scheduler_id
        ))
        .into());
    }
    let cron_expression = body.cron_expression.filter(|c| !c.trim().is_empty());
    let cron = cron_expression.as_deref().map(parse_cron).transpose()?;

    let now = state.enqueuer.now();
    let deadline_at = match body.deadline_at {
        Some(deadline_at) if deadline_at <= now => {
            return Err(ValidationError::new("`deadline_at` must be in the future").into());
        }
        Some(deadline_at) => deadline_at,
        None => state.deadlines.next_deadline(cron.as_ref(), now),
    };

    let schedule = Schedule::new(
        state.enqueuer.ids().generate_schedule_id(),
        body.payload,
        cron_expression,
        deadline_at,
        now,
    );
    let schedule = state.store.create_schedule(schedule).await?;
    info!(schedule_id = %schedule.id, scheduler_id = %schedule.scheduler_id, "schedule created");
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Schedule>, ApiError> {
    let id = parse_schedule_id(&id)?;
    let schedule = state
        .store
        .get_schedule(id)
        .await?
        .ok_or_else(|| ApiError::not_found("schedule", id.to_string()))?;
    Ok(Json(schedule))
}

pub async fn patch_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> Result<Json<Schedule>, ApiError> {
    let id = parse_schedule_id(&id)?;
    let mut schedule = state
        .store
        .get_schedule(id)
        .await?
        .ok_or_else(|| ApiError::not_found("schedule", id.to_string()))?;

    if let Some(enabled) = patch.enabled {
        schedule.enabled = enabled;
    }
    if let Some(expr) = patch.cron_expression {
        let expr = Some(expr).filter(|c| !c.trim().is_empty());
        if expr != schedule.cron_expression {
            let cron = expr.as_deref().map(parse_cron).transpose()?;
            schedule.deadline_at = state
                .deadlines
                .next_deadline(cron.as_ref(), state.enqueuer.now());
            schedule.cron_expression = expr;
        }
    }

    let schedule = state.store.update_schedule(&schedule).await?;
    info!(schedule_id = %schedule.id, enabled = schedule.enabled, "schedule updated");
    Ok(Json(schedule))
}
