//! ApiError - LoomError を HTTP ステータスに写像する
//!
//! | error                    | status |
//! |--------------------------|--------|
//! | FilterError              | 400    |
//! | ValidationError          | 422    |
//! | NotFound                 | 404    |
//! | InvalidTransition / 重複 | 409    |
//! | QueueFull                | 429    |
//! | Storage / Internal       | 500    |
//! | ExternalServiceError     | 502    |

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::domain::LoomError;
use crate::ports::StoreError;
use crate::queue::QueueError;

#[derive(Debug)]
pub struct ApiError(pub LoomError);

impl<E: Into<LoomError>> From<E> for ApiError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl ApiError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self(StoreError::NotFound {
            entity,
            id: id.into(),
        }
        .into())
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LoomError::Filter(_) => StatusCode::BAD_REQUEST,
            LoomError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LoomError::Queue(QueueError::Full { .. }) => StatusCode::TOO_MANY_REQUESTS,
            LoomError::Queue(QueueError::Empty(_)) => StatusCode::NOT_FOUND,
            LoomError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            LoomError::Store(StoreError::InvalidTransition(_) | StoreError::Conflict(_)) => {
                StatusCode::CONFLICT
            }
            LoomError::Store(StoreError::Storage(_)) | LoomError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LoomError::External(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}
