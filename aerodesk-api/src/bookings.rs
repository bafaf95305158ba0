use aerodesk_shared::Booking;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{auth_middleware, Requester};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub flight_id: Uuid,
    pub seats: i32,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    booking_id: Uuid,
    cancelled: bool,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route("/v1/bookings/mine", get(my_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state
        .engine
        .create_booking(requester.id, req.flight_id, req.seats)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let cancelled = state.engine.cancel_booking(booking_id, requester.id).await?;
    Ok(Json(CancelResponse {
        booking_id,
        cancelled,
    }))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .engine
        .get_booking(booking_id, requester.id, requester.role.can_view_all())
        .await?;
    Ok(Json(booking))
}

async fn my_bookings(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(
        state.engine.list_bookings_for_requester(requester.id).await?,
    ))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
) -> Result<Json<Vec<Booking>>, AppError> {
    if !requester.role.can_view_all() {
        return Err(AppError::AuthorizationError(
            "Listing all bookings requires STAFF or ADMIN".to_string(),
        ));
    }
    Ok(Json(state.engine.list_bookings().await?))
}
