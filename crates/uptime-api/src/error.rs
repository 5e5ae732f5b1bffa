use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use uptime_core::{ConfigError, ImportError, SchedulerError, StoreError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_kind, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_kind.to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound(e.to_string()),
            StoreError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            StoreError::Unavailable(_) => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(inner) => inner.into(),
            SchedulerError::NotFound(_) => ApiError::NotFound(e.to_string()),
            SchedulerError::Busy(_) | SchedulerError::NotDue(_) | SchedulerError::LeaseLost(_) => {
                ApiError::Conflict(e.to_string())
            }
            SchedulerError::ShuttingDown => ApiError::Unavailable(e.to_string()),
            SchedulerError::InvalidTransition { .. } => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ImportError> for ApiError {
    fn from(e: ImportError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status(e: impl Into<ApiError>) -> StatusCode {
        e.into().into_response().status()
    }

    #[test]
    fn maps_core_errors_to_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(status(StoreError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(status(SchedulerError::Busy(id)), StatusCode::CONFLICT);
        assert_eq!(status(SchedulerError::LeaseLost(id)), StatusCode::CONFLICT);
        assert_eq!(status(SchedulerError::Store(StoreError::Unavailable("down".into()))), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(ConfigError::ZeroTimeout), StatusCode::BAD_REQUEST);
        assert_eq!(status(ImportError::UnsupportedVersion(9)), StatusCode::BAD_REQUEST);
    }
}
