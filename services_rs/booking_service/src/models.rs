use crate::store::{Booking, BookingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TripIn {
    pub bus_name: String,
    pub bus_type: Option<String>,
    pub origin: String,
    pub destination: String,
    pub depart_at_iso: String,
    pub arrive_at_iso: String,
    pub fare_minor: i64,
    #[serde(default = "default_seats_total")]
    pub seats_total: u32,
    pub seat_ids: Option<Vec<String>>,
}

fn default_seats_total() -> u32 {
    40
}

#[derive(Debug, Serialize, Clone)]
pub struct TripOut {
    pub id: String,
    pub bus_name: String,
    pub bus_type: Option<String>,
    pub origin: String,
    pub destination: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub fare_minor: i64,
    pub currency: String,
    pub seats_total: u32,
    pub seats_available: u32,
}

#[derive(Debug, Serialize)]
pub struct SeatsOut {
    pub trip_id: String,
    pub seats_total: u32,
    pub committed: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BookingIn {
    pub trip_id: String,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub seat_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingOut {
    pub token: String,
    pub trip_id: String,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub seat_ids: Vec<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub order_id: Option<String>,
    pub txn_id: Option<String>,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingOut {
    pub fn from_booking(b: Booking, currency: &str) -> Self {
        Self {
            token: b.token,
            trip_id: b.trip_id,
            customer_name: b.customer.name,
            email: b.customer.email,
            phone: b.customer.phone,
            seat_ids: b.seat_ids,
            amount_minor: b.amount_minor,
            currency: currency.to_string(),
            status: b.status,
            order_id: b.payment.order_id,
            txn_id: b.payment.txn_id,
            payment_method: b.payment.method,
            paid_at: b.payment.paid_at,
            cancel_reason: b.cancel_reason,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateBookingOut {
    pub booking: BookingOut,
    pub order_id: String,
    pub charge_session_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyIn {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReconcileOut {
    pub status: &'static str,
    pub booking: BookingOut,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusOut {
    pub order_id: String,
    pub booking_token: String,
    pub status: BookingStatus,
    pub amount_minor: i64,
    pub txn_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CancelIn {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatsOut {
    pub total_revenue_minor: i64,
    pub confirmed_bookings: usize,
    pub total_bookings: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetOut {
    pub trip_id: String,
    pub deleted_bookings: usize,
    pub cleared_seats: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageOut {
    pub message: &'static str,
}
