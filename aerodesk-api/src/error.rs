use aerodesk_core::ReservationError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    /// Transient; the client may retry
    Unavailable(String),
    /// Booking was cancelled but its seats still need to be returned
    ReconciliationPending(Uuid),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => {
                let body = Json(json!({ "error": msg }));
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    [(header::RETRY_AFTER, "1")],
                    body,
                )
                    .into_response();
            }
            AppError::ReconciliationPending(booking_id) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Booking {} was cancelled but seat availability has not been restored yet",
                    booking_id
                ),
            ),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        let msg = err.to_string();
        match err {
            ReservationError::InvalidRequest(_) => AppError::ValidationError(msg),
            ReservationError::NotFound { .. } => AppError::NotFoundError(msg),
            ReservationError::Forbidden { .. } => AppError::AuthorizationError(msg),
            ReservationError::Unavailable(_)
            | ReservationError::InsufficientCapacity { .. }
            | ReservationError::AlreadyCancelled(_) => AppError::ConflictError(msg),
            ReservationError::PoolExhausted | ReservationError::PoolClosed => {
                AppError::Unavailable(msg)
            }
            ReservationError::DegradedCancellation { booking_id, .. } => {
                // Cancellation stands; seats need reconciling out of band.
                tracing::error!("Degraded cancellation reported to client: {}", msg);
                AppError::ReconciliationPending(booking_id)
            }
            ReservationError::Store(e) => AppError::InternalServerError(e.to_string()),
        }
    }
}
