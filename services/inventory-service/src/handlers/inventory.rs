//! HTTP surface of the inventory service.
//!
//! Read paths plus the operator endpoints. Reserve/release are idempotent on
//! `bookingId` through the engine; repeating a call returns the current
//! reservation instead of mutating twice.

use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::db::{items, InventoryStore, ReserveOutcome};
use crate::error::AppError;

pub struct AppState {
    pub store: InventoryStore,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckAvailabilityRequest {
    #[validate(length(min = 1))]
    pub item_id: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CheckAvailabilityResponse {
    pub available: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemRequest {
    #[validate(length(min = 1))]
    pub item_id: String,
    #[validate(range(min = 0))]
    pub total_quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub booking_id: Uuid,
    #[validate(length(min = 1))]
    pub item_id: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(default)]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub booking_id: Uuid,
    pub reason: Option<String>,
}

pub async fn check_availability(
    state: web::Data<AppState>,
    payload: web::Json<CheckAvailabilityRequest>,
) -> Result<HttpResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let available = match items::find_item(state.store.pool(), &payload.item_id).await? {
        Some(item) => item.available_quantity >= payload.quantity,
        None => false,
    };

    Ok(HttpResponse::Ok().json(CheckAvailabilityResponse { available }))
}

pub async fn list_inventory(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let items = items::list_items(state.store.pool()).await?;
    Ok(HttpResponse::Ok().json(items))
}

pub async fn get_item(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let item_id = path.into_inner();
    match items::find_item(state.store.pool(), &item_id).await? {
        Some(item) => Ok(HttpResponse::Ok().json(item)),
        None => Err(AppError::NotFound(format!("Item {} not found", item_id))),
    }
}

pub async fn create_item(
    state: web::Data<AppState>,
    payload: web::Json<CreateItemRequest>,
) -> Result<HttpResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let item = items::create_item(state.store.pool(), &payload.item_id, payload.total_quantity).await?;
    Ok(HttpResponse::Created().json(item))
}

/// Operator reserve. Same engine path as the saga consumer, so it is
/// idempotent on `bookingId` and emits the same events.
pub async fn reserve(
    state: web::Data<AppState>,
    payload: web::Json<ReserveRequest>,
) -> Result<HttpResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let outcome = state
        .store
        .reserve(
            payload.booking_id,
            &payload.item_id,
            payload.quantity,
            payload.amount,
            Uuid::new_v4(),
        )
        .await?;

    match outcome {
        ReserveOutcome::Reserved(reservation) => {
            Ok(HttpResponse::Created().json(reservation))
        }
        ReserveOutcome::AlreadyReserved(reservation) => {
            Ok(HttpResponse::Ok().json(reservation))
        }
        ReserveOutcome::Rejected { reason } => Ok(HttpResponse::Conflict().json(serde_json::json!({
            "error": reason,
            "status": 409,
        }))),
    }
}

/// Operator release. A missing or inactive reservation is a no-op.
pub async fn release(
    state: web::Data<AppState>,
    payload: web::Json<ReleaseRequest>,
) -> Result<HttpResponse, AppError> {
    let reason = payload
        .reason
        .clone()
        .unwrap_or_else(|| "Released by operator".to_string());

    match state
        .store
        .release(payload.booking_id, &reason, Uuid::new_v4())
        .await?
    {
        Some(reservation) => Ok(HttpResponse::Ok().json(reservation)),
        None => Ok(HttpResponse::Ok().json(serde_json::json!({
            "released": false,
            "bookingId": payload.booking_id,
        }))),
    }
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}
