//! HTTP surface of the booking service.
//!
//! The upstream gateway authenticates callers and supplies `X-User-Id`;
//! the header is treated as authoritative here.

use actix_web::{web, HttpRequest, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::db::BookingStore;
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-Id";

pub struct AppState {
    pub store: BookingStore,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    #[validate(length(min = 1))]
    pub room_id: String,
    pub amount: Decimal,
}

/// Trusted user identity from the gateway.
pub fn user_id_from(req: &HttpRequest) -> Result<Uuid, AppError> {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or(AppError::Unauthorized)
}

/// `POST /bookings` — create a `PENDING` booking; the saga takes it from
/// there.
pub async fn create_booking(
    req: HttpRequest,
    state: web::Data<AppState>,
    payload: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = user_id_from(&req)?;

    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }

    let booking = state
        .store
        .create(user_id, &payload.room_id, payload.amount)
        .await?;

    Ok(HttpResponse::Created().json(booking))
}

/// `GET /bookings/{id}` — owners only.
pub async fn get_booking(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user_id = user_id_from(&req)?;
    let booking_id = path.into_inner();

    let booking = state
        .store
        .find(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Booking {} not found", booking_id)))?;

    if !booking.is_owned_by(user_id) {
        return Err(AppError::Forbidden(
            "Booking belongs to another user".to_string(),
        ));
    }

    Ok(HttpResponse::Ok().json(booking))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}
