use crate::catalog::TripCatalog;
use crate::engine::ReservationEngine;
use crate::ledger::SeatLedger;
use crate::reconcile::PaymentReconciler;
use crate::store::BookingStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// What a previous request with the same Idempotency-Key created; replays
/// must return the same booking or be rejected on parameter mismatch.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub trip_id: String,
    pub seats_hash: String,
    pub booking_token: String,
    pub order_id: String,
    pub session_ref: String,
}

#[derive(Clone)]
pub struct AppState {
    pub env_name: String,
    pub env_lower: String,
    pub currency: String,
    pub catalog: Arc<TripCatalog>,
    pub ledger: Arc<SeatLedger>,
    pub store: Arc<BookingStore>,
    pub engine: Arc<ReservationEngine>,
    pub reconciler: Arc<PaymentReconciler>,
    pub idempotency: Arc<Mutex<HashMap<String, IdempotencyRecord>>>,
}
