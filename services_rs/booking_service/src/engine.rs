use crate::catalog::{CatalogError, TripCatalog};
use crate::ledger::{LedgerError, SeatLedger};
use crate::notify::Notifier;
use crate::store::{Booking, BookingStatus, BookingStore, Customer, PaymentRef, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub const REASON_EXPIRED: &str = "expired";

const MAX_SEATS_PER_BOOKING: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("trip not found")]
    TripNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("seats unavailable")]
    SeatsUnavailable(Vec<String>),
    #[error("booking already cancelled")]
    AlreadyCancelled,
    #[error("booking changed concurrently")]
    Conflict,
}

/// Booking lifecycle orchestration. The engine is the only writer that
/// creates store records and the only caller of ledger hold/commit/release.
///
/// Writer discipline: every status transition wins the store's optimistic
/// check FIRST and only then touches the ledger. The store is the arbiter
/// between racing confirm/cancel/expire, so the loser of a race never gets
/// to move seats.
pub struct ReservationEngine {
    catalog: Arc<TripCatalog>,
    ledger: Arc<SeatLedger>,
    store: Arc<BookingStore>,
    notifier: Notifier,
    hold_ttl: Duration,
}

fn validate_customer(customer: &Customer) -> Result<Customer, EngineError> {
    let name = customer.name.trim();
    let email = customer.email.trim();
    let phone = customer.phone.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("customer name required".to_string()));
    }
    if email.is_empty() || !email.contains('@') || email.contains(' ') {
        return Err(EngineError::Validation("valid email required".to_string()));
    }
    if phone.is_empty() {
        return Err(EngineError::Validation("customer phone required".to_string()));
    }
    Ok(Customer {
        name: name.to_string(),
        email: email.to_lowercase(),
        phone: phone.to_string(),
    })
}

impl ReservationEngine {
    pub fn new(
        catalog: Arc<TripCatalog>,
        ledger: Arc<SeatLedger>,
        store: Arc<BookingStore>,
        notifier: Notifier,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            ledger,
            store,
            notifier,
            hold_ttl,
        }
    }

    pub fn ledger(&self) -> &SeatLedger {
        &self.ledger
    }

    fn is_expired(&self, booking: &Booking, now: DateTime<Utc>) -> bool {
        booking.status == BookingStatus::Pending && booking.created_at + self.hold_ttl <= now
    }

    /// Validates the request, claims the seats, and persists a pending
    /// booking. On a seat conflict nothing is created, so the client can
    /// retry with a different selection without leaving garbage behind.
    pub fn create_booking(
        &self,
        trip_id: &str,
        customer: Customer,
        seat_ids: &[String],
    ) -> Result<Booking, EngineError> {
        let customer = validate_customer(&customer)?;

        if seat_ids.is_empty() {
            return Err(EngineError::Validation("seat_ids cannot be empty".to_string()));
        }
        if seat_ids.len() > MAX_SEATS_PER_BOOKING {
            return Err(EngineError::Validation(format!(
                "at most {MAX_SEATS_PER_BOOKING} seats per booking"
            )));
        }
        let mut seats: Vec<String> = Vec::with_capacity(seat_ids.len());
        for raw in seat_ids {
            let seat = raw.trim().to_string();
            if seat.is_empty() {
                return Err(EngineError::Validation("empty seat id".to_string()));
            }
            if seats.iter().any(|s| s == &seat) {
                return Err(EngineError::Validation("seat_ids must be unique".to_string()));
            }
            seats.push(seat);
        }

        let trip = match self.catalog.get(trip_id) {
            Ok(t) => t,
            Err(CatalogError::NotFound) => return Err(EngineError::TripNotFound),
            Err(CatalogError::Invalid(msg)) => return Err(EngineError::Validation(msg)),
        };
        let unknown: Vec<String> = seats
            .iter()
            .filter(|s| !trip.has_seat(s))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::Validation(format!(
                "unknown seats for this trip: {}",
                unknown.join(", ")
            )));
        }

        let hold = match self.ledger.try_hold(trip_id, &seats) {
            Ok(h) => h,
            Err(LedgerError::SeatsUnavailable(conflicts)) => {
                return Err(EngineError::SeatsUnavailable(conflicts))
            }
            Err(LedgerError::HoldNotFound) => return Err(EngineError::Conflict),
        };

        // The fare is authoritative; client-supplied totals are never read.
        let amount_minor = trip.fare_minor * seats.len() as i64;
        let now = Utc::now();
        let booking = Booking {
            token: format!("TKT-{}", Uuid::new_v4().simple().to_string().to_uppercase()),
            trip_id: trip_id.to_string(),
            customer,
            seat_ids: seats,
            amount_minor,
            status: BookingStatus::Pending,
            payment: PaymentRef::default(),
            cancel_reason: None,
            hold: Some(hold.clone()),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.insert(booking.clone()) {
            // Token collision cannot realistically happen; do not leak the hold.
            tracing::error!(error = %e, "booking insert failed");
            self.ledger.release(&hold);
            return Err(EngineError::Conflict);
        }
        Ok(booking)
    }

    /// Resolves a pending booking to confirmed: seats committed, txn id and
    /// paid-at recorded, confirmation queued. Idempotent for an already
    /// confirmed booking; a cancelled booking reports the race instead of
    /// silently accepting a late payment.
    pub fn confirm(&self, token: &str, gateway_txn_id: &str) -> Result<Booking, EngineError> {
        for attempt in 0..2 {
            let now = Utc::now();
            let booking = self.store.get(token).ok_or(EngineError::BookingNotFound)?;

            if self.is_expired(&booking, now) {
                self.cancel_pending(token, REASON_EXPIRED);
                continue;
            }

            match booking.status {
                BookingStatus::Confirmed => return Ok(booking),
                BookingStatus::Cancelled => return Err(EngineError::AlreadyCancelled),
                BookingStatus::Pending => {}
            }

            let txn = gateway_txn_id.trim().to_string();
            match self.store.update(token, BookingStatus::Pending, |b| {
                b.status = BookingStatus::Confirmed;
                b.payment.txn_id = Some(txn.clone()).filter(|t| !t.is_empty());
                b.payment.paid_at = Some(now);
                b.hold = None;
            }) {
                Ok(updated) => {
                    match &booking.hold {
                        Some(hold) => {
                            if let Err(e) = self.ledger.commit(hold) {
                                // Cannot happen under the writer discipline: only
                                // the transition winner consumes the hold.
                                tracing::error!(booking = %token, error = %e, "hold missing at commit");
                            }
                        }
                        None => {
                            tracing::error!(booking = %token, "pending booking without a hold");
                        }
                    }
                    self.notifier.notify(token);
                    return Ok(updated);
                }
                Err(StoreError::NotFound) => return Err(EngineError::BookingNotFound),
                Err(StoreError::Conflict { .. }) if attempt == 0 => continue,
                Err(_) => return Err(EngineError::Conflict),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Cancels a booking. Pending bookings release their hold; confirmed
    /// bookings are an administrative cancellation that frees the committed
    /// seats (refund handling stays out of scope). Idempotent when already
    /// cancelled.
    pub fn cancel(&self, token: &str, reason: &str) -> Result<Booking, EngineError> {
        let reason = reason.trim().to_string();
        for attempt in 0..2 {
            let booking = self.store.get(token).ok_or(EngineError::BookingNotFound)?;

            let expected = match booking.status {
                BookingStatus::Cancelled => return Ok(booking),
                other => other,
            };

            let set_reason = reason.clone();
            match self.store.update(token, expected, |b| {
                b.status = BookingStatus::Cancelled;
                b.cancel_reason = Some(set_reason).filter(|r| !r.is_empty());
                b.hold = None;
            }) {
                Ok(updated) => {
                    match expected {
                        BookingStatus::Pending => {
                            if let Some(hold) = &booking.hold {
                                self.ledger.release(hold);
                            }
                        }
                        BookingStatus::Confirmed => {
                            self.ledger
                                .discard_committed(&booking.trip_id, &booking.seat_ids);
                        }
                        BookingStatus::Cancelled => {}
                    }
                    return Ok(updated);
                }
                Err(StoreError::NotFound) => return Err(EngineError::BookingNotFound),
                Err(StoreError::Conflict { .. }) if attempt == 0 => continue,
                Err(_) => return Err(EngineError::Conflict),
            }
        }
        Err(EngineError::Conflict)
    }

    /// Pending→cancelled only; racing writers simply win instead of us.
    /// Used by expiry, where "someone else resolved it" is success.
    fn cancel_pending(&self, token: &str, reason: &str) -> bool {
        let Some(booking) = self.store.get(token) else {
            return false;
        };
        if booking.status != BookingStatus::Pending {
            return false;
        }
        let reason = reason.to_string();
        match self.store.update(token, BookingStatus::Pending, |b| {
            b.status = BookingStatus::Cancelled;
            b.cancel_reason = Some(reason);
            b.hold = None;
        }) {
            Ok(_) => {
                if let Some(hold) = &booking.hold {
                    self.ledger.release(hold);
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Current state of a booking, with lazy expiry applied first so an
    /// abandoned payment attempt is visible as cancelled the moment anything
    /// touches it.
    pub fn get_fresh(&self, token: &str) -> Result<Booking, EngineError> {
        let booking = self.store.get(token).ok_or(EngineError::BookingNotFound)?;
        if self.is_expired(&booking, Utc::now()) {
            self.cancel_pending(token, REASON_EXPIRED);
            return self.store.get(token).ok_or(EngineError::BookingNotFound);
        }
        Ok(booking)
    }

    /// Background sweep: cancels every pending booking whose hold window has
    /// lapsed. Returns how many were expired.
    pub fn expire_overdue(&self) -> usize {
        let now = Utc::now();
        let mut expired = 0;
        for booking in self.store.list() {
            if self.is_expired(&booking, now) && self.cancel_pending(&booking.token, REASON_EXPIRED)
            {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(count = expired, "expired overdue pending bookings");
        }
        expired
    }
}
