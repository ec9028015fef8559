//! HTTP surface of the payment service.
//!
//! `POST /payments/retry` never raises on an exhausted retry budget: the
//! caller gets the PERMANENTLY_FAILED representation (HTTP 200) with an
//! `errorMessage` explaining the dead-letter deposit.

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::db::{PaymentStore, RetryOutcome};
use crate::error::AppError;

pub struct AppState {
    pub store: PaymentStore,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub booking_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1))]
    pub method: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequest {
    pub booking_id: Uuid,
    pub method: Option<String>,
}

/// `POST /payments/pay` — operator charge path; resolves the effect before
/// responding. Idempotent on `bookingId`.
pub async fn pay(
    state: web::Data<AppState>,
    payload: web::Json<PayRequest>,
) -> Result<HttpResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if payload.amount <= Decimal::ZERO {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }

    let payment = state
        .store
        .process(
            payload.booking_id,
            payload.amount,
            &payload.method,
            Uuid::new_v4(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(payment))
}

/// `POST /payments/retry` — bounded manual retry of a FAILED payment.
pub async fn retry(
    state: web::Data<AppState>,
    payload: web::Json<RetryRequest>,
) -> Result<HttpResponse, AppError> {
    let outcome = state
        .store
        .retry(payload.booking_id, payload.method.as_deref())
        .await?;

    match outcome {
        RetryOutcome::Retried(payment) => Ok(HttpResponse::Ok().json(payment)),
        // Max-retry is still a 200: the terminal record tells the story.
        RetryOutcome::PermanentlyFailed(payment) => Ok(HttpResponse::Ok().json(payment)),
        RetryOutcome::Denied { reason, .. } => Err(AppError::Conflict(reason)),
        RetryOutcome::NotFound => Err(AppError::NotFound(format!(
            "No payment for booking {}",
            payload.booking_id
        ))),
    }
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}
