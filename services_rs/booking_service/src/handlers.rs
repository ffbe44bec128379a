use crate::catalog::{Trip, TripSpec};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::reconcile::ReconcileOutcome;
use crate::state::{AppState, IdempotencyRecord};
use crate::store::Customer;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDate, Utc};
use sha2::Digest;

#[derive(Debug, serde::Deserialize)]
pub struct ListTripsParams {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<String>, // YYYY-MM-DD
}

#[derive(Debug, serde::Deserialize)]
pub struct ListBookingsParams {
    pub trip_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health(State(state): State<AppState>) -> axum::Json<HealthOut> {
    axum::Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "safar_booking_service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn parse_iso8601(dt: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(dt.trim())
        .map(|v| v.with_timezone(&Utc))
        .map_err(|_| ApiError::bad_request("timestamps must be ISO-8601"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("date must be YYYY-MM-DD"))
}

fn normalize_limit(raw: Option<i64>, default: i64, min: i64, max: i64) -> i64 {
    raw.unwrap_or(default).clamp(min, max)
}

/// Order-insensitive fingerprint of a seat selection, for idempotency-key
/// parameter matching.
fn seat_ids_hash(seats: &[String]) -> String {
    let mut v: Vec<String> = seats.iter().map(|s| s.trim().to_string()).collect();
    v.sort_unstable();
    let digest = sha2::Sha256::digest(v.join(",").as_bytes());
    hex::encode(digest)
}

fn trip_out(state: &AppState, trip: Trip) -> TripOut {
    let committed = state.ledger.committed_seats(&trip.id).len() as u32;
    TripOut {
        id: trip.id,
        bus_name: trip.bus_name,
        bus_type: trip.bus_type,
        origin: trip.origin,
        destination: trip.destination,
        depart_at: trip.depart_at,
        arrive_at: trip.arrive_at,
        fare_minor: trip.fare_minor,
        currency: state.currency.clone(),
        seats_total: trip.seats_total,
        seats_available: trip.seats_total.saturating_sub(committed),
    }
}

fn spec_from(body: TripIn) -> Result<TripSpec, ApiError> {
    Ok(TripSpec {
        bus_name: body.bus_name,
        bus_type: body.bus_type,
        origin: body.origin,
        destination: body.destination,
        depart_at: parse_iso8601(&body.depart_at_iso)?,
        arrive_at: parse_iso8601(&body.arrive_at_iso)?,
        fare_minor: body.fare_minor,
        seats_total: body.seats_total,
        seat_ids: body.seat_ids,
    })
}

pub async fn list_trips(
    State(state): State<AppState>,
    Query(params): Query<ListTripsParams>,
) -> ApiResult<axum::Json<Vec<TripOut>>> {
    let date = match params.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_date(raw)?),
        None => None,
    };
    let trips = state
        .catalog
        .list(params.origin.as_deref(), params.destination.as_deref(), date);
    Ok(axum::Json(
        trips.into_iter().map(|t| trip_out(&state, t)).collect(),
    ))
}

pub async fn trip_cities(State(state): State<AppState>) -> axum::Json<Vec<String>> {
    axum::Json(state.catalog.cities())
}

pub async fn trip_detail(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.catalog.get(trip_id.trim())?;
    Ok(axum::Json(trip_out(&state, trip)))
}

pub async fn trip_seats(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<SeatsOut>> {
    let trip = state.catalog.get(trip_id.trim())?;
    let mut committed: Vec<String> = state.ledger.committed_seats(&trip.id).into_iter().collect();
    committed.sort();
    Ok(axum::Json(SeatsOut {
        trip_id: trip.id,
        seats_total: trip.seats_total,
        committed,
    }))
}

pub async fn create_trip(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<TripIn>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.catalog.create(spec_from(body)?)?;
    Ok(axum::Json(trip_out(&state, trip)))
}

pub async fn update_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<TripIn>,
) -> ApiResult<axum::Json<TripOut>> {
    let trip = state.catalog.update(trip_id.trim(), spec_from(body)?)?;
    Ok(axum::Json(trip_out(&state, trip)))
}

pub async fn delete_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<MessageOut>> {
    state.catalog.delete(trip_id.trim())?;
    Ok(axum::Json(MessageOut {
        message: "trip deleted",
    }))
}

pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<BookingIn>,
) -> ApiResult<axum::Json<CreateBookingOut>> {
    let trip_id = body.trip_id.trim().to_string();
    if trip_id.is_empty() {
        return Err(ApiError::bad_request("trip_id required"));
    }

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(k) = idempotency_key.as_deref() {
        if k.len() > 120 {
            return Err(ApiError::bad_request("Idempotency-Key too long"));
        }
    }

    let seats_hash = seat_ids_hash(&body.seat_ids);
    if let Some(key) = idempotency_key.as_deref() {
        let replay = {
            let records = state.idempotency.lock().expect("idempotency lock poisoned");
            records.get(key).cloned()
        };
        if let Some(rec) = replay {
            if rec.trip_id != trip_id || rec.seats_hash != seats_hash {
                return Err(ApiError::conflict(
                    "Idempotency-Key reused with different parameters",
                ));
            }
            let booking = state.engine.get_fresh(&rec.booking_token)?;
            return Ok(axum::Json(CreateBookingOut {
                booking: BookingOut::from_booking(booking, &state.currency),
                order_id: rec.order_id,
                charge_session_ref: rec.session_ref,
            }));
        }
    }

    let customer = Customer {
        name: body.customer_name,
        email: body.email,
        phone: body.phone,
    };
    let booking = state
        .engine
        .create_booking(&trip_id, customer, &body.seat_ids)?;
    let (booking, session) = state.reconciler.initiate(&booking.token).await?;
    let order_id = booking.payment.order_id.clone().unwrap_or_default();

    if let Some(key) = idempotency_key {
        state
            .idempotency
            .lock()
            .expect("idempotency lock poisoned")
            .insert(
                key,
                IdempotencyRecord {
                    trip_id,
                    seats_hash,
                    booking_token: booking.token.clone(),
                    order_id: order_id.clone(),
                    session_ref: session.session_ref.clone(),
                },
            );
    }

    Ok(axum::Json(CreateBookingOut {
        booking: BookingOut::from_booking(booking, &state.currency),
        order_id,
        charge_session_ref: session.session_ref,
    }))
}

pub async fn booking_status(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<BookingOut>> {
    let booking = state.engine.get_fresh(token.trim())?;
    Ok(axum::Json(BookingOut::from_booking(
        booking,
        &state.currency,
    )))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    Query(params): Query<ListBookingsParams>,
) -> ApiResult<axum::Json<Vec<BookingOut>>> {
    let limit = normalize_limit(params.limit, 100, 1, 500) as usize;
    let bookings = match params.trip_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(trip_id) => state.store.list_by_trip(trip_id),
        None => state.store.list(),
    };
    Ok(axum::Json(
        bookings
            .into_iter()
            .take(limit)
            .map(|b| BookingOut::from_booking(b, &state.currency))
            .collect(),
    ))
}

pub async fn cancel_booking(
    Path(token): Path<String>,
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CancelIn>,
) -> ApiResult<axum::Json<BookingOut>> {
    let reason = body
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("cancelled by operator");
    let booking = state.engine.cancel(token.trim(), reason)?;
    Ok(axum::Json(BookingOut::from_booking(
        booking,
        &state.currency,
    )))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<VerifyIn>,
) -> ApiResult<axum::Json<ReconcileOut>> {
    let order_id = body.order_id.trim();
    if order_id.is_empty() {
        return Err(ApiError::bad_request("order_id required"));
    }
    let outcome = state.reconciler.reconcile(order_id).await?;
    let (status, booking) = match outcome {
        ReconcileOutcome::Confirmed(b) => ("confirmed", b),
        ReconcileOutcome::StillPending(b) => ("pending", b),
        ReconcileOutcome::Cancelled(b) => ("cancelled", b),
    };
    Ok(axum::Json(ReconcileOut {
        status,
        booking: BookingOut::from_booking(booking, &state.currency),
    }))
}

pub async fn payment_status(
    Path(order_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<PaymentStatusOut>> {
    let order_id = order_id.trim().to_string();
    let booking = state
        .store
        .get_by_order(&order_id)
        .ok_or_else(|| ApiError::not_found("no booking for this order"))?;
    // Re-read through the engine so an expired hold shows as cancelled.
    let booking = state.engine.get_fresh(&booking.token)?;
    Ok(axum::Json(PaymentStatusOut {
        order_id,
        booking_token: booking.token,
        status: booking.status,
        amount_minor: booking.amount_minor,
        txn_id: booking.payment.txn_id,
        paid_at: booking.payment.paid_at,
    }))
}

pub async fn admin_stats(State(state): State<AppState>) -> axum::Json<StatsOut> {
    let bookings = state.store.list();
    let mut revenue = 0i64;
    let mut confirmed = 0usize;
    for b in &bookings {
        if b.status == crate::store::BookingStatus::Confirmed {
            revenue += b.amount_minor;
            confirmed += 1;
        }
    }
    axum::Json(StatsOut {
        total_revenue_minor: revenue,
        confirmed_bookings: confirmed,
        total_bookings: bookings.len(),
    })
}

/// Non-production data reset: drops the trip's bookings, empties its seat
/// ledger entry, and forgets idempotency records that point at the deleted
/// bookings. Only reachable through the internal-auth layer.
pub async fn admin_reset_trip(
    Path(trip_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<axum::Json<ResetOut>> {
    let trip_id = trip_id.trim().to_string();
    state.catalog.get(&trip_id)?;

    tracing::warn!(trip = %trip_id, "resetting trip bookings and seat ledger");
    let deleted_bookings = state.store.clear_trip(&trip_id);
    let cleared_seats = state.ledger.clear(&trip_id);
    state
        .idempotency
        .lock()
        .expect("idempotency lock poisoned")
        .retain(|_, rec| rec.trip_id != trip_id);

    Ok(axum::Json(ResetOut {
        trip_id,
        deleted_bookings,
        cleared_seats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TripCatalog;
    use crate::engine::ReservationEngine;
    use crate::gateway::{GatewayConfig, PaymentGateway};
    use crate::ledger::SeatLedger;
    use crate::notify::Notifier;
    use crate::reconcile::PaymentReconciler;
    use crate::store::{BookingStatus, BookingStore};
    use crate::testutil::MockGateway;
    use axum::http::HeaderValue;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[test]
    fn seat_hash_is_order_insensitive() {
        let a = seat_ids_hash(&["A2".to_string(), "A1".to_string()]);
        let b = seat_ids_hash(&["A1".to_string(), "A2".to_string()]);
        let c = seat_ids_hash(&["A1".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn limits_are_normalized() {
        assert_eq!(normalize_limit(None, 100, 1, 500), 100);
        assert_eq!(normalize_limit(Some(-3), 100, 1, 500), 1);
        assert_eq!(normalize_limit(Some(9000), 100, 1, 500), 500);
    }

    #[test]
    fn iso_timestamps_are_required() {
        assert!(parse_iso8601("2026-09-01T08:30:00Z").is_ok());
        assert!(parse_iso8601("next tuesday").is_err());
        assert!(parse_date("2026-09-01").is_ok());
        assert!(parse_date("01/09/2026").is_err());
    }

    fn test_state(base_url: &str) -> AppState {
        let catalog = Arc::new(TripCatalog::new());
        let ledger = Arc::new(SeatLedger::new());
        let store = Arc::new(BookingStore::new());
        let (notifier, _rx) = Notifier::new();
        let engine = Arc::new(ReservationEngine::new(
            catalog.clone(),
            ledger.clone(),
            store.clone(),
            notifier,
            Duration::minutes(15),
        ));
        let gateway = PaymentGateway::new(
            reqwest::Client::new(),
            GatewayConfig {
                base_url: base_url.to_string(),
                client_id: "app-id-test".to_string(),
                client_secret: "app-secret-test".to_string(),
                api_version: "2022-09-01".to_string(),
            },
        );
        let reconciler = Arc::new(PaymentReconciler::new(
            engine.clone(),
            store.clone(),
            gateway,
            "INR".to_string(),
            "cashfree".to_string(),
        ));
        AppState {
            env_name: "test".to_string(),
            env_lower: "test".to_string(),
            currency: "INR".to_string(),
            catalog,
            ledger,
            store,
            engine,
            reconciler,
            idempotency: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn seed_trip(state: &AppState) -> String {
        let depart = Utc::now() + Duration::days(1);
        state
            .catalog
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
            .expect("trip")
            .id
    }

    fn booking_body(trip_id: &str, seats: &[&str]) -> BookingIn {
        BookingIn {
            trip_id: trip_id.to_string(),
            customer_name: "Amal Haddad".to_string(),
            email: "amal@example.com".to_string(),
            phone: "+963-900-000000".to_string(),
            seat_ids: seats.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn idempotency_key_replay_returns_the_same_booking_without_a_second_charge() {
        let mock = MockGateway::spawn().await;
        let state = test_state(&mock.base_url);
        let trip_id = seed_trip(&state);

        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("idem-1"));

        let first = create_booking(
            State(state.clone()),
            headers.clone(),
            axum::Json(booking_body(&trip_id, &["A1", "A2"])),
        )
        .await
        .expect("first create")
        .0;

        let replay = create_booking(
            State(state.clone()),
            headers.clone(),
            axum::Json(booking_body(&trip_id, &["A2", "A1"])),
        )
        .await
        .expect("replay")
        .0;

        assert_eq!(first.booking.token, replay.booking.token);
        assert_eq!(first.order_id, replay.order_id);
        assert_eq!(first.charge_session_ref, replay.charge_session_ref);
        // One gateway order, not two.
        assert_eq!(mock.requests().len(), 1);

        // Same key with a different selection must be rejected.
        let err = create_booking(
            State(state.clone()),
            headers,
            axum::Json(booking_body(&trip_id, &["A3"])),
        )
        .await
        .expect_err("parameter mismatch");
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn verify_payment_confirms_and_seat_snapshot_updates() {
        let mock = MockGateway::spawn().await;
        let state = test_state(&mock.base_url);
        let trip_id = seed_trip(&state);

        let created = create_booking(
            State(state.clone()),
            HeaderMap::new(),
            axum::Json(booking_body(&trip_id, &["A1", "A2"])),
        )
        .await
        .expect("create")
        .0;
        assert_eq!(created.booking.amount_minor, 1000);

        mock.set_status_response(200, r#"{"order_status":"PAID","cf_order_id":"55001"}"#);
        let verified = verify_payment(
            State(state.clone()),
            axum::Json(VerifyIn {
                order_id: created.order_id.clone(),
            }),
        )
        .await
        .expect("verify")
        .0;
        assert_eq!(verified.status, "confirmed");
        assert_eq!(verified.booking.txn_id.as_deref(), Some("55001"));

        let seats = trip_seats(Path(trip_id.clone()), State(state.clone()))
            .await
            .expect("seats")
            .0;
        assert_eq!(seats.committed, vec!["A1".to_string(), "A2".to_string()]);

        let status = payment_status(Path(created.order_id.clone()), State(state.clone()))
            .await
            .expect("status")
            .0;
        assert_eq!(status.status, BookingStatus::Confirmed);
        assert_eq!(status.booking_token, created.booking.token);
    }

    #[tokio::test]
    async fn admin_reset_clears_bookings_seats_and_idempotency() {
        let mock = MockGateway::spawn().await;
        let state = test_state(&mock.base_url);
        let trip_id = seed_trip(&state);

        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("idem-reset"));
        let created = create_booking(
            State(state.clone()),
            headers,
            axum::Json(booking_body(&trip_id, &["A1"])),
        )
        .await
        .expect("create")
        .0;

        mock.set_status_response(200, r#"{"order_status":"PAID"}"#);
        verify_payment(
            State(state.clone()),
            axum::Json(VerifyIn {
                order_id: created.order_id.clone(),
            }),
        )
        .await
        .expect("verify");

        let reset = admin_reset_trip(Path(trip_id.clone()), State(state.clone()))
            .await
            .expect("reset")
            .0;
        assert_eq!(reset.deleted_bookings, 1);
        assert_eq!(reset.cleared_seats, 1);

        let err = booking_status(Path(created.booking.token.clone()), State(state.clone()))
            .await
            .expect_err("booking gone");
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
        assert!(state.idempotency.lock().expect("lock").is_empty());
        assert!(state.ledger.committed_seats(&trip_id).is_empty());
    }
}
