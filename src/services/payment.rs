//! Payment-link issuance and webhook signatures
//!
//! The booking ledger depends on one call: `create_payment_link(booking_id,
//! amount)` returning `{id, url}`. The HTTP adapter POSTs
//! `{"bookingId", "amount"}` to the configured provider endpoint with a bearer
//! API key. Without an endpoint every call fails, which keeps `accept` from
//! ever leaving a booking without a link.

use async_trait::async_trait;
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::PaymentConfig;
use crate::models::PaymentLink;

#[derive(Debug, Error)]
pub enum PaymentLinkError {
    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Payment provider returned status {0}")]
    Status(u16),

    #[error("Payment provider returned an invalid link")]
    InvalidResponse,
}

/// Mints hosted payment links
#[async_trait]
pub trait PaymentLinkIssuer: Send + Sync {
    async fn create_payment_link(
        &self,
        booking_id: &str,
        amount: Option<u64>,
    ) -> Result<PaymentLink, PaymentLinkError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkRequest<'a> {
    booking_id: &'a str,
    amount: Option<u64>,
}

#[derive(Deserialize)]
struct CreateLinkResponse {
    id: String,
    url: String,
}

/// Calls the provider over HTTP
pub struct HttpPaymentLinkIssuer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPaymentLinkIssuer {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build payment client: {}", e))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentLinkIssuer for HttpPaymentLinkIssuer {
    async fn create_payment_link(
        &self,
        booking_id: &str,
        amount: Option<u64>,
    ) -> Result<PaymentLink, PaymentLinkError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&CreateLinkRequest { booking_id, amount });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PaymentLinkError::Status(status.as_u16()));
        }

        let body: CreateLinkResponse = response
            .json()
            .await
            .map_err(|_| PaymentLinkError::InvalidResponse)?;
        if body.id.is_empty() || body.url.is_empty() {
            return Err(PaymentLinkError::InvalidResponse);
        }

        Ok(PaymentLink {
            id: body.id,
            url: body.url,
        })
    }
}

/// Stand-in when no provider endpoint is configured
pub struct DisabledPaymentLinkIssuer;

#[async_trait]
impl PaymentLinkIssuer for DisabledPaymentLinkIssuer {
    async fn create_payment_link(
        &self,
        _booking_id: &str,
        _amount: Option<u64>,
    ) -> Result<PaymentLink, PaymentLinkError> {
        Err(PaymentLinkError::NotConfigured)
    }
}

pub fn create_payment_issuer(config: &PaymentConfig) -> anyhow::Result<Arc<dyn PaymentLinkIssuer>> {
    match config.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => Ok(Arc::new(HttpPaymentLinkIssuer::new(
            endpoint,
            &config.api_key,
            Duration::from_secs(config.timeout_seconds),
        )?)),
        None => {
            tracing::warn!("payment.endpoint is not set; accepting bookings will fail");
            Ok(Arc::new(DisabledPaymentLinkIssuer))
        }
    }
}

/// Hex HMAC-SHA256 of a webhook body
pub fn sign_webhook(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid webhook secret: {}", e))?;
    mac.update(body);
    Ok(HEXLOWER.encode(&mac.finalize().into_bytes()))
}

/// Constant-time check of an `x-signature` header against the body.
///
/// An empty secret never verifies.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = HEXLOWER.decode(signature.trim().to_ascii_lowercase().as_bytes()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_issuer_always_fails() {
        let issuer = create_payment_issuer(&PaymentConfig::default()).unwrap();
        let err = issuer.create_payment_link("b1", None).await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::NotConfigured));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_transport_error() {
        let issuer =
            HttpPaymentLinkIssuer::new("http://127.0.0.1:9/links", "key", Duration::from_secs(2))
                .unwrap();
        let err = issuer.create_payment_link("b1", Some(2500)).await.unwrap_err();
        assert!(matches!(err, PaymentLinkError::Transport(_)));
    }

    #[test]
    fn test_webhook_signature_round_trip() {
        let body = br#"{"bookingId":"b1"}"#;
        let signature = sign_webhook("whsec", body).unwrap();

        assert_eq!(signature.len(), 64);
        assert!(verify_webhook_signature("whsec", body, &signature));
        assert!(verify_webhook_signature("whsec", body, &signature.to_uppercase()));
        assert!(!verify_webhook_signature("other", body, &signature));
        assert!(!verify_webhook_signature("whsec", br#"{"bookingId":"b2"}"#, &signature));
        assert!(!verify_webhook_signature("whsec", body, "zz"));
        assert!(!verify_webhook_signature("", body, &signature));
    }

    #[test]
    fn test_request_body_shape() {
        let json = serde_json::to_value(CreateLinkRequest {
            booking_id: "b1",
            amount: None,
        })
        .unwrap();
        assert_eq!(json["bookingId"], "b1");
        assert!(json["amount"].is_null());
    }
}
