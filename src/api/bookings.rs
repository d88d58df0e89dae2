//! Booking API endpoints
//!
//! - POST /api/bookings - create-booking (customer, rate limited)
//! - PATCH /api/bookings/{id}/status - accept or reject (owner, rate limited)
//! - GET /api/bookings/customer - the caller's bookings (customer)

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;

use crate::api::middleware::{parse_json, ApiError, AppState, ClientIdentity};
use crate::api::responses::ApiResponse;
use crate::models::{CreateBookingInput, Role};
use crate::services::OwnerDecision;

/// Body of `PATCH /api/bookings/{id}/status`
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusChange {
    Accept,
    Reject,
}

impl From<StatusChange> for OwnerDecision {
    fn from(change: StatusChange) -> Self {
        match change {
            StatusChange::Accept => OwnerDecision::Accept,
            StatusChange::Reject => OwnerDecision::Reject,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: StatusChange,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_booking))
        .route("/customer", get(list_for_customer))
        .route("/{id}/status", patch(change_status))
}

/// POST /api/bookings
async fn create_booking(
    State(state): State<AppState>,
    identity: ClientIdentity,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.admit(&identity, &state.config.rate_limit.booking).await?;
    let customer = state.authenticate(&headers, Some(Role::Customer)).await?;
    let body: CreateBookingInput = parse_json(&body)?;

    let booking = state.ledger.create(customer.id(), body).await?;
    Ok(ApiResponse::created(booking))
}

/// PATCH /api/bookings/{id}/status
async fn change_status(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.admit(&identity, &state.config.rate_limit.booking).await?;
    let owner = state.authenticate(&headers, Some(Role::Owner)).await?;
    let body: ChangeStatusRequest = parse_json(&body)?;

    let booking = state
        .ledger
        .decide(&id, owner.id(), body.status.into())
        .await?;
    Ok(ApiResponse::ok(booking))
}

/// GET /api/bookings/customer
async fn list_for_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let customer = state.authenticate(&headers, Some(Role::Customer)).await?;
    let bookings = state.ledger.list_for_customer(customer.id()).await?;
    Ok(ApiResponse::ok(bookings))
}
