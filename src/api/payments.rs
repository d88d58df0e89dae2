//! Payment provider webhook
//!
//! - POST /api/payments/confirm - `{bookingId}` signed with `x-signature`
//!   (hex HMAC-SHA256 of the raw body under `payment.webhook_secret`)

use axum::{
    body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, routing::post, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::ApiResponse;
use crate::services::payment::verify_webhook_signature;

pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPayload {
    booking_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/confirm", post(confirm_payment))
}

/// POST /api/payments/confirm
async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_webhook_signature(&state.config.payment.webhook_secret, &body, signature) {
        tracing::warn!("Rejected payment webhook with a bad signature");
        return Err(ApiError::unauthorized("Invalid webhook signature"));
    }

    let payload: ConfirmPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation_error(format!("Invalid webhook body: {}", e)))?;

    let booking = state.ledger.confirm(&payload.booking_id).await?;
    tracing::info!("Payment confirmed for booking {}", booking.id);
    Ok(ApiResponse::ok(booking))
}
