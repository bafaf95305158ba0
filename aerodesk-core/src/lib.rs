pub mod pool;
pub mod repository;
pub mod reservation;

pub use pool::{
    ConnectionManager, PoolConfig, PoolError, PoolStatus, PooledConnection, PooledResource,
    ResourcePool,
};
pub use repository::{InventoryRepository, StoreError, StoreResult};
pub use reservation::{ReservationEngine, ReservationError, ReservationResult};
