use aerodesk_shared::{Booking, BookingStatus, NewBooking, SeatInventory};
use async_trait::async_trait;
use uuid::Uuid;

use crate::pool::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator for the reservation engine.
///
/// Every call runs against a connection borrowed from a `ResourcePool` and
/// returns it before completing.
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn load_flight_inventory(&self, flight_id: Uuid) -> StoreResult<Option<SeatInventory>>;

    /// Subtract `seats` only if at least that many are available, as one
    /// indivisible step. Returns whether the decrement happened.
    async fn conditional_decrement_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<bool>;

    /// Unconditionally add `seats` back. Errors if the flight row is gone.
    async fn increment_seats(&self, flight_id: Uuid, seats: i32) -> StoreResult<()>;

    /// Persist a confirmed booking and return it with its assigned id
    async fn insert_booking(&self, booking: &NewBooking) -> StoreResult<Booking>;

    async fn load_booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>>;

    /// Move a booking from `expected` to `status` in a single write.
    /// Returns false when the booking is no longer in `expected`.
    async fn update_booking_status(
        &self,
        booking_id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
    ) -> StoreResult<bool>;

    /// Bookings of one requester, newest first
    async fn list_bookings_for_requester(&self, requester_id: Uuid) -> StoreResult<Vec<Booking>>;

    /// All bookings, newest first
    async fn list_bookings(&self) -> StoreResult<Vec<Booking>>;
}
