use uuid::Uuid;

/// Published after a booking has been committed or cancelled
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    BookingConfirmed {
        booking_id: Uuid,
        flight_id: Uuid,
        requester_id: Uuid,
        seats: i32,
        timestamp: i64,
    },
    BookingCancelled {
        booking_id: Uuid,
        flight_id: Uuid,
        requester_id: Uuid,
        seats: i32,
        timestamp: i64,
    },
}

impl BookingEvent {
    pub fn flight_id(&self) -> Uuid {
        match self {
            BookingEvent::BookingConfirmed { flight_id, .. } => *flight_id,
            BookingEvent::BookingCancelled { flight_id, .. } => *flight_id,
        }
    }
}
