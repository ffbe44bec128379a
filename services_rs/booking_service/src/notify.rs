use crate::catalog::TripCatalog;
use crate::store::BookingStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Fire-and-forget handle the engine uses on the pending→confirmed
/// transition. Sending never blocks and never fails the booking: delivery is
/// the worker's problem.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<String>,
}

impl Notifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, booking_token: &str) {
        if self.tx.send(booking_token.to_string()).is_err() {
            tracing::warn!(booking = %booking_token, "notification worker gone, confirmation not queued");
        }
    }
}

/// Drains the confirmation queue. Rendering/delivery belongs to the mail
/// collaborator; this worker resolves the booking context and records the
/// dispatch, so a dead letter is visible in the logs but never touches the
/// booking transaction.
pub fn spawn_worker(
    mut rx: mpsc::UnboundedReceiver<String>,
    store: Arc<BookingStore>,
    catalog: Arc<TripCatalog>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(token) = rx.recv().await {
            let Some(booking) = store.get(&token) else {
                tracing::warn!(booking = %token, "confirmation queued for unknown booking");
                continue;
            };
            match catalog.get(&booking.trip_id) {
                Ok(trip) => {
                    tracing::info!(
                        booking = %token,
                        email = %booking.customer.email,
                        origin = %trip.origin,
                        destination = %trip.destination,
                        seats = booking.seat_ids.len(),
                        "booking confirmation dispatched"
                    );
                }
                Err(e) => {
                    tracing::warn!(booking = %token, error = %e, "confirmation dispatched without trip context");
                }
            }
        }
    })
}
