//! Server - REST API（axum）
//!
//! Task / Schedule / Queue の状態を公開し、実行系からのステータスコールバックを受けます。
//! リクエストは tower-http の `TraceLayer` でログに出ます。

mod error;
mod health;
mod query;
mod queues;
mod schedules;
mod tasks;

pub use self::error::ApiError;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::app::{Collaborators, Enqueuer, SchedulerControl, StatusBoard};
use crate::ports::Store;
use crate::queue::QueueRegistry;
use crate::ranker::DeadlineRanker;

/// Shared handles for the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub queues: Arc<QueueRegistry>,
    pub enqueuer: Arc<Enqueuer>,
    pub control: Arc<SchedulerControl>,
    pub status: Arc<StatusBoard>,
    pub collaborators: Collaborators,
    pub deadlines: DeadlineRanker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/tasks", get(tasks::list).patch(tasks::patch_many))
        .route("/tasks/{id}", get(tasks::get_one).patch(tasks::patch_one))
        .route("/tasks/{id}/events", get(tasks::events))
        .route("/schedules", get(schedules::list).post(schedules::create))
        .route(
            "/schedules/{id}",
            get(schedules::get_one).patch(schedules::patch_one),
        )
        .route("/queues", get(queues::list))
        .route("/queues/{id}", get(queues::get_one))
        .route("/queues/{id}/push", post(queues::push))
        .route("/schedulers/{kind}/enable", post(health::enable))
        .route("/schedulers/{kind}/disable", post(health::disable))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
