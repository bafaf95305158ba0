use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operational status of a flight
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    Scheduled,
    Boarding,
    Departed,
    Arrived,
    Cancelled,
    Delayed,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Scheduled => "SCHEDULED",
            FlightStatus::Boarding => "BOARDING",
            FlightStatus::Departed => "DEPARTED",
            FlightStatus::Arrived => "ARRIVED",
            FlightStatus::Cancelled => "CANCELLED",
            FlightStatus::Delayed => "DELAYED",
        }
    }

    /// Bookings may be taken against any flight that has not been cancelled
    pub fn is_bookable(&self) -> bool {
        *self != FlightStatus::Cancelled
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(FlightStatus::Scheduled),
            "BOARDING" => Ok(FlightStatus::Boarding),
            "DEPARTED" => Ok(FlightStatus::Departed),
            "ARRIVED" => Ok(FlightStatus::Arrived),
            "CANCELLED" => Ok(FlightStatus::Cancelled),
            "DELAYED" => Ok(FlightStatus::Delayed),
            other => Err(format!("unknown flight status: {}", other)),
        }
    }
}

/// Seat counter and pricing for a single flight.
///
/// `seats_available` never goes negative; it is only ever changed through the
/// repository's conditional decrement and increment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatInventory {
    pub flight_id: Uuid,
    pub flight_number: String,
    pub seats_available: i32,
    /// Price per seat in minor currency units
    pub price_amount: i64,
    pub currency: String,
    pub status: FlightStatus,
}
