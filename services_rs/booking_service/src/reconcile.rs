use crate::engine::{EngineError, ReservationEngine};
use crate::gateway::{ChargeSession, ChargeStatus, PaymentGateway};
use crate::store::{Booking, BookingStatus, BookingStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub enum ReconcileOutcome {
    Confirmed(Booking),
    StillPending(Booking),
    Cancelled(Booking),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no booking for this order")]
    NotFound,
    #[error("payment verification unavailable")]
    VerificationUnavailable,
    #[error("charge creation failed: {0}")]
    ChargeCreationFailed(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Bridge between the reservation engine and the external gateway; nothing
/// else in the service is allowed to call the provider.
///
/// Every operation here tolerates redelivery: callbacks may arrive twice or
/// not at all, and the engine's idempotent transitions absorb the repeats.
pub struct PaymentReconciler {
    engine: Arc<ReservationEngine>,
    store: Arc<BookingStore>,
    gateway: PaymentGateway,
    currency: String,
    method: String,
}

impl PaymentReconciler {
    pub fn new(
        engine: Arc<ReservationEngine>,
        store: Arc<BookingStore>,
        gateway: PaymentGateway,
        currency: String,
        method: String,
    ) -> Self {
        Self {
            engine,
            store,
            gateway,
            currency,
            method,
        }
    }

    /// Opens a charge for a freshly created pending booking. The order id is
    /// minted here, never derived from the booking token, so provider-side id
    /// reuse can't cross-contaminate bookings. If the provider refuses the
    /// charge the pending booking is rolled back so its seats free up
    /// immediately.
    pub async fn initiate(
        &self,
        booking_token: &str,
    ) -> Result<(Booking, ChargeSession), ReconcileError> {
        let order_id = format!("ORD-{}", Uuid::new_v4().simple().to_string().to_uppercase());

        let method = self.method.clone();
        let order = order_id.clone();
        let booking = match self
            .store
            .update(booking_token, BookingStatus::Pending, |b| {
                b.payment.order_id = Some(order);
                b.payment.method = Some(method);
            }) {
            Ok(b) => b,
            Err(StoreError::NotFound) => return Err(EngineError::BookingNotFound.into()),
            Err(_) => return Err(EngineError::Conflict.into()),
        };

        let note = format!(
            "bus booking {} - seats {}",
            booking.token,
            booking.seat_ids.join(", ")
        );
        match self
            .gateway
            .open_charge(
                &order_id,
                booking.amount_minor,
                &self.currency,
                &booking.customer,
                &note,
            )
            .await
        {
            Ok(session) => Ok((booking, session)),
            Err(e) => {
                tracing::error!(booking = %booking_token, error = %e, "charge creation failed, rolling back booking");
                if let Err(cancel_err) = self
                    .engine
                    .cancel(booking_token, "charge creation failed")
                {
                    tracing::error!(booking = %booking_token, error = %cancel_err, "rollback cancel failed");
                }
                Err(ReconcileError::ChargeCreationFailed(e.to_string()))
            }
        }
    }

    /// Resolves the true outcome of a charge and drives the matching booking
    /// transition. Called from the payment-return flow and from status
    /// re-polls; any number of deliveries for the same order id is safe.
    pub async fn reconcile(&self, order_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let booking = self
            .store
            .get_by_order(order_id)
            .ok_or(ReconcileError::NotFound)?;

        let status = self.gateway.charge_status(order_id).await.map_err(|e| {
            // An unreachable provider is not a failed payment: leave the
            // booking pending and let a later retry or the expiry window
            // decide.
            tracing::warn!(order = %order_id, error = %e, "charge status unavailable");
            ReconcileError::VerificationUnavailable
        })?;

        match status {
            ChargeStatus::Paid { txn_id } => {
                let txn = txn_id.unwrap_or_else(|| order_id.to_string());
                let confirmed = self.engine.confirm(&booking.token, &txn)?;
                Ok(ReconcileOutcome::Confirmed(confirmed))
            }
            ChargeStatus::Open => {
                let current = self.engine.get_fresh(&booking.token)?;
                Ok(match current.status {
                    BookingStatus::Pending => ReconcileOutcome::StillPending(current),
                    BookingStatus::Cancelled => ReconcileOutcome::Cancelled(current),
                    BookingStatus::Confirmed => ReconcileOutcome::Confirmed(current),
                })
            }
            ChargeStatus::Failed | ChargeStatus::Expired => {
                let current = self.engine.get_fresh(&booking.token)?;
                if current.status == BookingStatus::Confirmed {
                    // Contradicts an earlier PAID: keep the paid booking and
                    // make the mismatch loud instead of unselling a seat.
                    tracing::error!(order = %order_id, "provider reports failure for a confirmed booking");
                    return Ok(ReconcileOutcome::Confirmed(current));
                }
                let reason = match status {
                    ChargeStatus::Expired => "payment expired",
                    _ => "payment failed",
                };
                let cancelled = self.engine.cancel(&booking.token, reason)?;
                Ok(ReconcileOutcome::Cancelled(cancelled))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{TripCatalog, TripSpec};
    use crate::gateway::GatewayConfig;
    use crate::ledger::SeatLedger;
    use crate::notify::Notifier;
    use crate::store::Customer;
    use crate::testutil::MockGateway;
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        reconciler: PaymentReconciler,
        engine: Arc<ReservationEngine>,
        store: Arc<BookingStore>,
        ledger: Arc<SeatLedger>,
        trip_id: String,
        rx: UnboundedReceiver<String>,
    }

    fn customer() -> Customer {
        Customer {
            name: "Amal Haddad".to_string(),
            email: "amal@example.com".to_string(),
            phone: "+963-900-000000".to_string(),
        }
    }

    fn gateway_for(base_url: &str) -> PaymentGateway {
        PaymentGateway::new(
            reqwest::Client::new(),
            GatewayConfig {
                base_url: base_url.to_string(),
                client_id: "app-id-test".to_string(),
                client_secret: "app-secret-test".to_string(),
                api_version: "2022-09-01".to_string(),
            },
        )
    }

    fn harness(base_url: &str, ttl: Duration) -> Harness {
        let catalog = Arc::new(TripCatalog::new());
        let depart = Utc::now() + Duration::days(1);
        let trip = catalog
            .create(TripSpec {
                bus_name: "Safar Express".to_string(),
                bus_type: None,
                origin: "Aleppo".to_string(),
                destination: "Damascus".to_string(),
                depart_at: depart,
                arrive_at: depart + Duration::hours(5),
                fare_minor: 500,
                seats_total: 3,
                seat_ids: Some(vec!["A1".to_string(), "A2".to_string(), "A3".to_string()]),
            })
            .expect("trip");

        let ledger = Arc::new(SeatLedger::new());
        let store = Arc::new(BookingStore::new());
        let (notifier, rx) = Notifier::new();
        let engine = Arc::new(ReservationEngine::new(
            catalog,
            ledger.clone(),
            store.clone(),
            notifier,
            ttl,
        ));
        let reconciler = PaymentReconciler::new(
            engine.clone(),
            store.clone(),
            gateway_for(base_url),
            "INR".to_string(),
            "cashfree".to_string(),
        );
        Harness {
            reconciler,
            engine,
            store,
            ledger,
            trip_id: trip.id,
            rx,
        }
    }

    fn seats(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn initiate_mints_a_distinct_order_id_and_returns_the_session() {
        let mock = MockGateway::spawn().await;
        mock.set_open_response(200, r#"{"payment_session_id":"session-xyz"}"#);
        let h = harness(&mock.base_url, Duration::minutes(15));

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1", "A2"]))
            .expect("booking");
        let (updated, session) = h.reconciler.initiate(&booking.token).await.expect("initiate");

        assert_eq!(session.session_ref, "session-xyz");
        let order_id = updated.payment.order_id.expect("order id");
        assert!(order_id.starts_with("ORD-"));
        assert_ne!(order_id, booking.token);
        assert_eq!(updated.payment.method.as_deref(), Some("cashfree"));

        let reqs = mock.requests();
        assert_eq!(reqs.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&reqs[0].body).expect("json");
        assert_eq!(
            body.get("order_id").and_then(|v| v.as_str()),
            Some(order_id.as_str())
        );
        assert_eq!(body.get("order_amount").and_then(|v| v.as_f64()), Some(10.0));
    }

    #[tokio::test]
    async fn failed_charge_creation_rolls_the_booking_back() {
        let mock = MockGateway::spawn().await;
        mock.set_open_response(500, r#"{"message":"provider exploded"}"#);
        let h = harness(&mock.base_url, Duration::minutes(15));

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1"]))
            .expect("booking");
        let err = h
            .reconciler
            .initiate(&booking.token)
            .await
            .expect_err("must fail");
        assert!(matches!(err, ReconcileError::ChargeCreationFailed(_)));

        // No orphaned pending record holding seats.
        let rolled_back = h.store.get(&booking.token).expect("still recorded");
        assert_eq!(rolled_back.status, BookingStatus::Cancelled);
        h.engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1"]))
            .expect("seat free again");
    }

    #[tokio::test]
    async fn paid_reconcile_is_idempotent_across_redeliveries() {
        let mock = MockGateway::spawn().await;
        let mut h = harness(&mock.base_url, Duration::minutes(15));

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1"]))
            .expect("booking");
        let (updated, _) = h.reconciler.initiate(&booking.token).await.expect("initiate");
        let order_id = updated.payment.order_id.expect("order id");

        mock.set_status_response(200, r#"{"order_status":"PAID","cf_order_id":"77001"}"#);
        let first = h.reconciler.reconcile(&order_id).await.expect("reconcile");
        let second = h.reconciler.reconcile(&order_id).await.expect("reconcile again");

        for outcome in [first, second] {
            match outcome {
                ReconcileOutcome::Confirmed(b) => {
                    assert_eq!(b.status, BookingStatus::Confirmed);
                    assert_eq!(b.payment.txn_id.as_deref(), Some("77001"));
                }
                other => panic!("expected confirmed, got {other:?}"),
            }
        }

        // Committed once, notified once.
        assert_eq!(h.ledger.committed_seats(&h.trip_id).len(), 1);
        assert_eq!(h.rx.try_recv().ok(), Some(booking.token.clone()));
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn open_charge_status_leaves_the_booking_pending() {
        let mock = MockGateway::spawn().await;
        let h = harness(&mock.base_url, Duration::minutes(15));

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1"]))
            .expect("booking");
        let (updated, _) = h.reconciler.initiate(&booking.token).await.expect("initiate");
        let order_id = updated.payment.order_id.expect("order id");

        mock.set_status_response(200, r#"{"order_status":"ACTIVE"}"#);
        match h.reconciler.reconcile(&order_id).await.expect("reconcile") {
            ReconcileOutcome::StillPending(b) => assert_eq!(b.status, BookingStatus::Pending),
            other => panic!("expected still pending, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_charge_cancels_and_frees_the_seats() {
        let mock = MockGateway::spawn().await;
        let h = harness(&mock.base_url, Duration::minutes(15));

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1", "A2"]))
            .expect("booking");
        let (updated, _) = h.reconciler.initiate(&booking.token).await.expect("initiate");
        let order_id = updated.payment.order_id.expect("order id");

        mock.set_status_response(200, r#"{"order_status":"CANCELLED"}"#);
        match h.reconciler.reconcile(&order_id).await.expect("reconcile") {
            ReconcileOutcome::Cancelled(b) => {
                assert_eq!(b.status, BookingStatus::Cancelled);
                assert_eq!(b.cancel_reason.as_deref(), Some("payment failed"));
            }
            other => panic!("expected cancelled, got {other:?}"),
        }
        assert!(h.ledger.committed_seats(&h.trip_id).is_empty());
        h.engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1", "A2"]))
            .expect("seats reusable");
    }

    #[tokio::test]
    async fn unknown_order_id_reports_not_found_without_side_effects() {
        let mock = MockGateway::spawn().await;
        let h = harness(&mock.base_url, Duration::minutes(15));

        let err = h
            .reconciler
            .reconcile("ORD-DOES-NOT-EXIST")
            .await
            .expect_err("must fail");
        assert!(matches!(err, ReconcileError::NotFound));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn provider_outage_preserves_the_pending_booking() {
        let mock = MockGateway::spawn().await;
        let h = harness(&mock.base_url, Duration::minutes(15));

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1"]))
            .expect("booking");
        let (updated, _) = h.reconciler.initiate(&booking.token).await.expect("initiate");
        let order_id = updated.payment.order_id.expect("order id");

        // Same shared state, but the provider endpoint is dead.
        let dead = PaymentReconciler::new(
            h.engine.clone(),
            h.store.clone(),
            gateway_for("http://127.0.0.1:9"),
            "INR".to_string(),
            "cashfree".to_string(),
        );
        let err = dead.reconcile(&order_id).await.expect_err("must fail");
        assert!(matches!(err, ReconcileError::VerificationUnavailable));

        let current = h.store.get(&booking.token).expect("booking");
        assert_eq!(current.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn payment_reported_after_expiry_is_surfaced_not_accepted() {
        let mock = MockGateway::spawn().await;
        let h = harness(&mock.base_url, Duration::zero());

        let booking = h
            .engine
            .create_booking(&h.trip_id, customer(), &seats(&["A1"]))
            .expect("booking");
        let (updated, _) = h.reconciler.initiate(&booking.token).await.expect("initiate");
        let order_id = updated.payment.order_id.expect("order id");

        mock.set_status_response(200, r#"{"order_status":"PAID","cf_order_id":"88001"}"#);
        let err = h.reconciler.reconcile(&order_id).await.expect_err("must surface");
        assert!(matches!(
            err,
            ReconcileError::Engine(EngineError::AlreadyCancelled)
        ));

        let current = h.store.get(&booking.token).expect("booking");
        assert_eq!(current.status, BookingStatus::Cancelled);
        assert!(h.ledger.committed_seats(&h.trip_id).is_empty());
    }
}
