use crate::ledger::HoldToken;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Gateway-side identifiers for a booking's charge. The order id is minted by
/// the reconciler and is the only key the gateway ever sees.
#[derive(Debug, Clone, Default)]
pub struct PaymentRef {
    pub order_id: Option<String>,
    pub txn_id: Option<String>,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Booking {
    pub token: String,
    pub trip_id: String,
    pub customer: Customer,
    pub seat_ids: Vec<String>,
    pub amount_minor: i64,
    pub status: BookingStatus,
    pub payment: PaymentRef,
    pub cancel_reason: Option<String>,
    // Internal: the live ledger hold while the booking is pending.
    pub(crate) hold: Option<HoldToken>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("booking not found")]
    NotFound,
    #[error("booking status changed concurrently")]
    Conflict { actual: BookingStatus },
    #[error("booking token already exists")]
    DuplicateToken,
}

#[derive(Default)]
struct Inner {
    by_token: HashMap<String, Booking>,
    by_order: HashMap<String, String>,
}

/// Keyed booking storage with token / gateway-order-id / trip-id lookup paths.
/// No business logic lives here; writers race through `update`, which only
/// applies when the stored status still matches the caller's expectation.
#[derive(Default)]
pub struct BookingStore {
    inner: RwLock<Inner>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.by_token.contains_key(&booking.token) {
            return Err(StoreError::DuplicateToken);
        }
        if let Some(order_id) = &booking.payment.order_id {
            inner
                .by_order
                .insert(order_id.clone(), booking.token.clone());
        }
        inner.by_token.insert(booking.token.clone(), booking);
        Ok(())
    }

    pub fn get(&self, token: &str) -> Option<Booking> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.by_token.get(token).cloned()
    }

    pub fn get_by_order(&self, order_id: &str) -> Option<Booking> {
        let inner = self.inner.read().expect("store lock poisoned");
        let token = inner.by_order.get(order_id)?;
        inner.by_token.get(token).cloned()
    }

    /// Applies `mutate` only if the stored status still equals `expected`;
    /// otherwise fails with the status some other writer already won.
    pub fn update(
        &self,
        token: &str,
        expected: BookingStatus,
        mutate: impl FnOnce(&mut Booking),
    ) -> Result<Booking, StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let booking = inner.by_token.get_mut(token).ok_or(StoreError::NotFound)?;
        if booking.status != expected {
            return Err(StoreError::Conflict {
                actual: booking.status,
            });
        }
        let old_order = booking.payment.order_id.clone();
        mutate(booking);
        booking.updated_at = Utc::now();
        let updated = booking.clone();

        if updated.payment.order_id != old_order {
            if let Some(old) = old_order {
                inner.by_order.remove(&old);
            }
            if let Some(new) = updated.payment.order_id.clone() {
                inner.by_order.insert(new, token.to_string());
            }
        }
        Ok(updated)
    }

    /// Every booking, newest first. Ties break on token so the listing is
    /// stable across calls.
    pub fn list(&self) -> Vec<Booking> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut out: Vec<Booking> = inner.by_token.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.token.cmp(&b.token)));
        out
    }

    pub fn list_by_trip(&self, trip_id: &str) -> Vec<Booking> {
        self.list()
            .into_iter()
            .filter(|b| b.trip_id == trip_id)
            .collect()
    }

    /// Removes every booking for the trip (administrative reset only).
    pub fn clear_trip(&self, trip_id: &str) -> usize {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let tokens: Vec<String> = inner
            .by_token
            .values()
            .filter(|b| b.trip_id == trip_id)
            .map(|b| b.token.clone())
            .collect();
        for token in &tokens {
            if let Some(b) = inner.by_token.remove(token) {
                if let Some(order_id) = &b.payment.order_id {
                    inner.by_order.remove(order_id);
                }
            }
        }
        tokens.len()
    }
}
