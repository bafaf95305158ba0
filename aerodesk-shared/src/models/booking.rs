use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Booking status in the lifecycle.
///
/// `Confirmed` is the only entry state. `Cancelled` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Whether the booking still holds seats on the flight
    pub fn holds_seats(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "COMPLETED" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

/// A seat reservation held by one requester on one flight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Uuid,
    pub flight_id: Uuid,
    /// Read from the flight, not stored on the booking
    pub flight_number: String,
    pub requester_id: Uuid,
    pub seats_booked: i32,
    /// Fixed at creation: seat price × seats_booked, minor units
    pub total_price_amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub booked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Booking record as handed to the repository for insertion.
/// The repository assigns the id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewBooking {
    pub flight_id: Uuid,
    pub flight_number: String,
    pub requester_id: Uuid,
    pub seats_booked: i32,
    pub total_price_amount: i64,
    pub currency: String,
}

impl NewBooking {
    /// Materialize the record with a fresh id, always in `Confirmed`
    pub fn into_booking(self, id: Uuid) -> Booking {
        let now = Utc::now();
        Booking {
            id,
            flight_id: self.flight_id,
            flight_number: self.flight_number,
            requester_id: self.requester_id,
            seats_booked: self.seats_booked,
            total_price_amount: self.total_price_amount,
            currency: self.currency,
            status: BookingStatus::Confirmed,
            booked_at: now,
            updated_at: now,
        }
    }
}
