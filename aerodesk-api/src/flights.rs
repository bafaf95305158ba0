use aerodesk_shared::SeatInventory;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/flights/{id}/inventory", get(flight_inventory))
}

async fn flight_inventory(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Json<SeatInventory>, AppError> {
    Ok(Json(state.engine.flight_inventory(flight_id).await?))
}
