pub mod models;

pub use models::booking::{Booking, BookingStatus, NewBooking};
pub use models::events::BookingEvent;
pub use models::flight::{FlightStatus, SeatInventory};
