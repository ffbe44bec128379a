use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Exclusive claim on a set of seats, pending payment outcome. Opaque to
/// callers; the embedded trip id lets commit/release find the right entry
/// without a global index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldToken {
    trip_id: String,
    id: Uuid,
}

impl HoldToken {
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("seats unavailable: {0:?}")]
    SeatsUnavailable(Vec<String>),
    #[error("hold not found")]
    HoldNotFound,
}

#[derive(Default)]
struct TripSeats {
    committed: HashSet<String>,
    holds: HashMap<Uuid, Vec<String>>,
}

/// Authoritative record of which seats are unavailable per trip.
///
/// All mutation for one trip happens under that trip's mutex, so two
/// overlapping claims can never both succeed, while unrelated trips never
/// contend. The critical sections are pure map work; gateway I/O happens
/// well outside them.
#[derive(Default)]
pub struct SeatLedger {
    trips: RwLock<HashMap<String, Arc<Mutex<TripSeats>>>>,
}

impl SeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, trip_id: &str) -> Arc<Mutex<TripSeats>> {
        if let Some(e) = self
            .trips
            .read()
            .expect("ledger lock poisoned")
            .get(trip_id)
        {
            return e.clone();
        }
        let mut trips = self.trips.write().expect("ledger lock poisoned");
        trips
            .entry(trip_id.to_string())
            .or_insert_with(Arc::default)
            .clone()
    }

    /// Atomically claims `seat_ids` for `trip_id`, checking both committed
    /// seats and every live hold. Either all seats are free and a hold covers
    /// them, or nothing is registered and the conflicting subset is returned.
    pub fn try_hold(&self, trip_id: &str, seat_ids: &[String]) -> Result<HoldToken, LedgerError> {
        let entry = self.entry(trip_id);
        let mut seats = entry.lock().expect("trip lock poisoned");

        let mut conflicts: Vec<String> = Vec::new();
        for seat in seat_ids {
            let held = seats.holds.values().any(|h| h.contains(seat));
            if seats.committed.contains(seat) || held {
                conflicts.push(seat.clone());
            }
        }
        if !conflicts.is_empty() {
            return Err(LedgerError::SeatsUnavailable(conflicts));
        }

        let id = Uuid::new_v4();
        seats.holds.insert(id, seat_ids.to_vec());
        Ok(HoldToken {
            trip_id: trip_id.to_string(),
            id,
        })
    }

    /// Converts a hold into committed seats. A hold that was already released
    /// or committed is gone, which is how duplicate confirmations surface.
    pub fn commit(&self, hold: &HoldToken) -> Result<(), LedgerError> {
        let entry = self.entry(&hold.trip_id);
        let mut seats = entry.lock().expect("trip lock poisoned");
        let held = seats
            .holds
            .remove(&hold.id)
            .ok_or(LedgerError::HoldNotFound)?;
        seats.committed.extend(held);
        Ok(())
    }

    /// Discards a hold without committing. Idempotent: reconciliation retries
    /// may release a hold that is already gone.
    pub fn release(&self, hold: &HoldToken) {
        let entry = self.entry(&hold.trip_id);
        let mut seats = entry.lock().expect("trip lock poisoned");
        seats.holds.remove(&hold.id);
    }

    /// Removes previously committed seats (administrative cancellation of a
    /// paid booking). Unknown seats are ignored.
    pub fn discard_committed(&self, trip_id: &str, seat_ids: &[String]) {
        let entry = self.entry(trip_id);
        let mut seats = entry.lock().expect("trip lock poisoned");
        for seat in seat_ids {
            seats.committed.remove(seat);
        }
    }

    pub fn committed_seats(&self, trip_id: &str) -> HashSet<String> {
        let entry = self.entry(trip_id);
        let seats = entry.lock().expect("trip lock poisoned");
        seats.committed.clone()
    }

    /// Drops every hold and committed seat for the trip. Reset only.
    pub fn clear(&self, trip_id: &str) -> usize {
        let entry = self.entry(trip_id);
        let mut seats = entry.lock().expect("trip lock poisoned");
        let cleared = seats.committed.len();
        seats.committed.clear();
        seats.holds.clear();
        cleared
    }
}
