use aerodesk_core::{PoolStatus, ReservationEngine};
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

/// Snapshot of the backing connection pool, for health reporting
pub type PoolStatusFn = Arc<dyn Fn() -> PoolStatus + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub engine: ReservationEngine,
    pub pool_status: PoolStatusFn,
    pub auth: AuthConfig,
}
