use crate::catalog::CatalogError;
use crate::engine::EngineError;
use crate::reconcile::ReconcileError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub seats: Option<Vec<String>>,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            seats: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    pub fn upstream(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, detail)
    }

    /// 409 carrying the specific seats the client must re-select.
    pub fn seats_unavailable(seats: Vec<String>) -> Self {
        let mut e = Self::conflict("some seats are no longer available");
        e.seats = Some(seats);
        e
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seats: Option<&'a [String]>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            detail: self.detail.as_str(),
            seats: self.seats.as_deref(),
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(msg) => ApiError::bad_request(msg),
            EngineError::TripNotFound => ApiError::not_found("trip not found"),
            EngineError::BookingNotFound => ApiError::not_found("booking not found"),
            EngineError::SeatsUnavailable(seats) => ApiError::seats_unavailable(seats),
            EngineError::AlreadyCancelled => ApiError::conflict("booking already cancelled"),
            EngineError::Conflict => ApiError::conflict("booking changed concurrently, retry"),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound => ApiError::not_found("trip not found"),
            CatalogError::Invalid(msg) => ApiError::bad_request(msg),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::NotFound => ApiError::not_found("no booking for this order"),
            ReconcileError::VerificationUnavailable => {
                ApiError::upstream("could not verify payment, try again")
            }
            ReconcileError::ChargeCreationFailed(_) => {
                ApiError::upstream("payment gateway error, please try again")
            }
            ReconcileError::Engine(e) => e.into(),
        }
    }
}
