//! Seat inventory reservation.
//!
//! Creating a booking reserves seats before recording the booking and gives
//! them back if the record cannot be written. Cancelling marks the booking
//! first and then restores the seats; a failed restore is reported as
//! `DegradedCancellation` so it can be reconciled.
//!
//! Both multi-step writes run on their own task. A caller that gives up
//! halfway (client disconnect, timeout) stops waiting but never interrupts
//! the sequence.

use aerodesk_shared::{Booking, BookingEvent, BookingStatus, NewBooking, SeatInventory};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pool::PoolError;
use crate::repository::{InventoryRepository, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Flight {0} is cancelled and cannot be booked")]
    Unavailable(Uuid),

    #[error("Not enough seats on flight {flight_id}: requested {requested}, available {available}")]
    InsufficientCapacity {
        flight_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Booking {booking_id} does not belong to requester {requester_id}")]
    Forbidden { booking_id: Uuid, requester_id: Uuid },

    #[error("Booking {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("No database connection available, retry later")]
    PoolExhausted,

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Booking {booking_id} was cancelled but {seats} seats were not returned to flight {flight_id}: {cause}")]
    DegradedCancellation {
        booking_id: Uuid,
        flight_id: Uuid,
        seats: i32,
        cause: String,
    },

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Pool(PoolError::PoolExhausted { .. }) => ReservationError::PoolExhausted,
            StoreError::Pool(PoolError::PoolClosed) => ReservationError::PoolClosed,
            other => ReservationError::Store(other),
        }
    }
}

impl ReservationError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, ReservationError::PoolExhausted)
    }
}

pub type ReservationResult<T> = Result<T, ReservationError>;

fn task_failed(e: JoinError) -> ReservationError {
    error!("Reservation task did not complete: {}", e);
    ReservationError::Store(StoreError::Backend(format!("Reservation task failed: {}", e)))
}

/// Executes booking create/cancel against a per-flight seat counter
#[derive(Clone)]
pub struct ReservationEngine {
    repo: Arc<dyn InventoryRepository>,
    events: Option<broadcast::Sender<BookingEvent>>,
}

impl ReservationEngine {
    pub fn new(repo: Arc<dyn InventoryRepository>) -> Self {
        Self { repo, events: None }
    }

    /// Publish confirmed/cancelled events on `sender` after each successful operation
    pub fn with_events(mut self, sender: broadcast::Sender<BookingEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn repository(&self) -> &Arc<dyn InventoryRepository> {
        &self.repo
    }

    pub async fn create_booking(
        &self,
        requester_id: Uuid,
        flight_id: Uuid,
        seats_requested: i32,
    ) -> ReservationResult<Booking> {
        if seats_requested <= 0 {
            return Err(ReservationError::InvalidRequest(
                "Seats booked must be a positive number".to_string(),
            ));
        }

        let inventory = self.flight_inventory(flight_id).await?;
        if !inventory.status.is_bookable() {
            warn!("Booking rejected, flight {} is cancelled", flight_id);
            return Err(ReservationError::Unavailable(flight_id));
        }

        let total_price_amount = inventory
            .price_amount
            .checked_mul(i64::from(seats_requested))
            .ok_or_else(|| ReservationError::InvalidRequest("Total price overflows".to_string()))?;

        let new_booking = NewBooking {
            flight_id,
            flight_number: inventory.flight_number,
            requester_id,
            seats_booked: seats_requested,
            total_price_amount,
            currency: inventory.currency,
        };

        let engine = self.clone();
        tokio::spawn(async move { engine.reserve_and_record(new_booking).await })
            .await
            .map_err(task_failed)?
    }

    async fn reserve_and_record(&self, new_booking: NewBooking) -> ReservationResult<Booking> {
        let flight_id = new_booking.flight_id;
        let requester_id = new_booking.requester_id;
        let seats_requested = new_booking.seats_booked;

        if !self
            .repo
            .conditional_decrement_seats(flight_id, seats_requested)
            .await?
        {
            return Err(self.decrement_refused(flight_id, seats_requested).await);
        }

        let booking = match self.repo.insert_booking(&new_booking).await {
            Ok(booking) => booking,
            Err(insert_err) => {
                // Seats were taken above; give them back before surfacing the failure.
                if let Err(rollback_err) = self.repo.increment_seats(flight_id, seats_requested).await {
                    error!(
                        "Seat rollback failed for flight {} ({} seats): {}; booking insert error: {}",
                        flight_id, seats_requested, rollback_err, insert_err
                    );
                } else {
                    warn!(
                        "Booking insert failed for flight {}, {} seats restored: {}",
                        flight_id, seats_requested, insert_err
                    );
                }
                return Err(insert_err.into());
            }
        };

        info!(
            "Booking created: id={}, requester={}, flight={}, seats={}",
            booking.id, requester_id, flight_id, seats_requested
        );
        self.publish(BookingEvent::BookingConfirmed {
            booking_id: booking.id,
            flight_id,
            requester_id,
            seats: seats_requested,
            timestamp: Utc::now().timestamp(),
        });

        Ok(booking)
    }

    /// Cancel a confirmed booking owned by `requester_id` and return its seats.
    /// A second cancel of the same booking fails with `AlreadyCancelled`.
    pub async fn cancel_booking(&self, booking_id: Uuid, requester_id: Uuid) -> ReservationResult<bool> {
        let booking = self.load_booking(booking_id).await?;

        if booking.requester_id != requester_id {
            warn!(
                "Cancellation of booking {} refused for requester {}",
                booking_id, requester_id
            );
            return Err(ReservationError::Forbidden {
                booking_id,
                requester_id,
            });
        }

        Self::ensure_cancellable(&booking)?;

        let engine = self.clone();
        tokio::spawn(async move { engine.cancel_and_restore(booking, requester_id).await })
            .await
            .map_err(task_failed)?
    }

    async fn cancel_and_restore(&self, booking: Booking, requester_id: Uuid) -> ReservationResult<bool> {
        let booking_id = booking.id;

        if !self
            .repo
            .update_booking_status(booking_id, BookingStatus::Confirmed, BookingStatus::Cancelled)
            .await?
        {
            // A concurrent writer moved it first.
            let current = self.load_booking(booking_id).await?;
            Self::ensure_cancellable(&current)?;
            return Err(ReservationError::AlreadyCancelled(booking_id));
        }

        if let Err(e) = self
            .repo
            .increment_seats(booking.flight_id, booking.seats_booked)
            .await
        {
            error!(
                "Booking {} cancelled but {} seats not returned to flight {}: {}",
                booking_id, booking.seats_booked, booking.flight_id, e
            );
            return Err(ReservationError::DegradedCancellation {
                booking_id,
                flight_id: booking.flight_id,
                seats: booking.seats_booked,
                cause: e.to_string(),
            });
        }

        info!(
            "Booking cancelled: id={}, requester={}, flight={}, seats={}",
            booking_id, requester_id, booking.flight_id, booking.seats_booked
        );
        self.publish(BookingEvent::BookingCancelled {
            booking_id,
            flight_id: booking.flight_id,
            requester_id,
            seats: booking.seats_booked,
            timestamp: Utc::now().timestamp(),
        });

        Ok(true)
    }

    /// Fetch a booking visible to `requester_id`; staff views pass `can_view_all`
    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        requester_id: Uuid,
        can_view_all: bool,
    ) -> ReservationResult<Booking> {
        let booking = self.load_booking(booking_id).await?;
        if !can_view_all && booking.requester_id != requester_id {
            return Err(ReservationError::Forbidden {
                booking_id,
                requester_id,
            });
        }
        Ok(booking)
    }

    pub async fn list_bookings_for_requester(&self, requester_id: Uuid) -> ReservationResult<Vec<Booking>> {
        Ok(self.repo.list_bookings_for_requester(requester_id).await?)
    }

    pub async fn list_bookings(&self) -> ReservationResult<Vec<Booking>> {
        Ok(self.repo.list_bookings().await?)
    }

    pub async fn flight_inventory(&self, flight_id: Uuid) -> ReservationResult<SeatInventory> {
        self.repo
            .load_flight_inventory(flight_id)
            .await?
            .ok_or(ReservationError::NotFound {
                entity: "Flight",
                id: flight_id,
            })
    }

    async fn load_booking(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.repo
            .load_booking(booking_id)
            .await?
            .ok_or(ReservationError::NotFound {
                entity: "Booking",
                id: booking_id,
            })
    }

    /// Work out why the store refused a decrement: the flight was cancelled
    /// in the meantime, or there are not enough seats left.
    async fn decrement_refused(&self, flight_id: Uuid, seats_requested: i32) -> ReservationError {
        match self.repo.load_flight_inventory(flight_id).await {
            Ok(Some(current)) if !current.status.is_bookable() => {
                warn!("Booking rejected, flight {} was cancelled", flight_id);
                ReservationError::Unavailable(flight_id)
            }
            Ok(Some(current)) => {
                warn!(
                    "Booking rejected, flight {} lacks capacity for {} seats",
                    flight_id, seats_requested
                );
                ReservationError::InsufficientCapacity {
                    flight_id,
                    requested: seats_requested,
                    available: current.seats_available,
                }
            }
            Ok(None) => ReservationError::NotFound {
                entity: "Flight",
                id: flight_id,
            },
            Err(e) => e.into(),
        }
    }

    fn ensure_cancellable(booking: &Booking) -> ReservationResult<()> {
        match booking.status {
            BookingStatus::Confirmed => Ok(()),
            BookingStatus::Cancelled => Err(ReservationError::AlreadyCancelled(booking.id)),
            BookingStatus::Completed => Err(ReservationError::InvalidRequest(format!(
                "Booking {} is completed and cannot be cancelled",
                booking.id
            ))),
        }
    }

    fn publish(&self, event: BookingEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }
}
