use aerodesk_shared::BookingEvent;
use tokio::sync::broadcast::{self, error::RecvError};

/// Write every booking event to the log until the engine side is dropped
pub async fn log_booking_events(mut rx: broadcast::Receiver<BookingEvent>) -> usize {
    let mut logged = 0;
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    tracing::info!(target: "aerodesk_api::events", "{}", json);
                    logged += 1;
                }
                Err(e) => tracing::warn!("Failed to encode booking event: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Booking event log lagged, {} events skipped", skipped)
            }
            Err(RecvError::Closed) => break,
        }
    }
    logged
}
