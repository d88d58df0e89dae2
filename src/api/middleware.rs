//! API plumbing shared by every handler
//!
//! - `AppState`: the services a request can reach
//! - `ApiError`: `{success:false, message, code}` with the status mapping
//! - `AuthenticatedUser` / `ClientIdentity`: request extractors
//!
//! Rate-limited handlers call [`AppState::admit`] before they parse the body
//! or authenticate, so an over-budget client is turned away without touching
//! the token store or the JSON decoder.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::{Config, RateLimitRule};
use crate::db::repositories::{
    RestaurantRepository, SqlxBookingRepository, SqlxRestaurantRepository, SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{Role, SessionClaims};
use crate::services::{
    AccountError, AccountService, AdmissionGate, AuthError, BookingLedger, EmailNotifier,
    LedgerError, PaymentLinkIssuer, RoomRegistry, TokenAuthority,
};
use crate::store::DynKeyValueStore;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "token";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenAuthority>,
    pub gate: Arc<AdmissionGate>,
    pub accounts: Arc<AccountService>,
    pub ledger: Arc<BookingLedger>,
    pub restaurants: Arc<dyn RestaurantRepository>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    /// Wire repositories and services over one pool and one store
    pub fn build(
        config: Config,
        pool: DynDatabasePool,
        store: DynKeyValueStore,
        email: Arc<dyn EmailNotifier>,
        payments: Arc<dyn PaymentLinkIssuer>,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenAuthority::new(
            &config.auth.token_secret,
            config.auth.token_ttl(),
            store.clone(),
        )?);
        let gate = Arc::new(AdmissionGate::new(store.clone(), config.rate_limit.enabled));
        let rooms = Arc::new(RoomRegistry::default());

        let users = SqlxUserRepository::boxed(pool.clone());
        let restaurants = SqlxRestaurantRepository::boxed(pool.clone());
        let bookings = SqlxBookingRepository::boxed(pool);

        let accounts = Arc::new(AccountService::new(
            users.clone(),
            store,
            email.clone(),
            tokens.clone(),
        ));
        let ledger = Arc::new(BookingLedger::new(
            bookings,
            restaurants.clone(),
            users,
            payments,
            email,
            rooms.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            tokens,
            gate,
            accounts,
            ledger,
            restaurants,
            rooms,
        })
    }

    /// Count this request against `rule`; `Err` is the ready-made 429
    pub async fn admit(
        &self,
        identity: &ClientIdentity,
        rule: &RateLimitRule,
    ) -> Result<(), ApiError> {
        let admission = self.gate.check_and_increment(&identity.0, rule).await;
        if admission.allowed {
            Ok(())
        } else {
            Err(ApiError::too_many_requests(&rule.message, admission.reset_at))
        }
    }

    /// Verify the request's session token, optionally requiring a role
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        role: Option<Role>,
    ) -> Result<AuthenticatedUser, ApiError> {
        let token = extract_session_token(headers);
        let claims = self.tokens.verify(token.as_deref(), role).await?;
        Ok(AuthenticatedUser(claims))
    }
}

/// Verified session of the caller
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub SessionClaims);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0.sub
    }
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.authenticate(&parts.headers, None).await
    }
}

/// Rate-limit identity of the caller
///
/// The socket peer address, or the forwarded client address when
/// `server.trust_proxy` is on. `unknown` if neither is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl FromRequestParts<AppState> for ClientIdentity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIdentity(resolve_client(
            &parts.headers,
            peer,
            state.config.server.trust_proxy,
        )))
    }
}

fn resolve_client(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = if trust_proxy {
        forwarded_address(headers)
    } else {
        None
    };
    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Decode a JSON request body that was read as raw bytes
///
/// Rate-limited handlers take the body as `Bytes` so the gate runs before
/// anything is parsed.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::validation_error(format!("Invalid request body: {}", e)))
}

/// Session token from `Authorization: Bearer` or the `token` cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// Error response for API errors
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub success: bool,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            code: code.into(),
            remaining: None,
            reset_time: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn too_many_requests(message: impl Into<String>, reset_at: DateTime<Utc>) -> Self {
        Self {
            remaining: Some(0),
            reset_time: Some(reset_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ..Self::new("TOO_MANY_REQUESTS", message)
        }
    }

    /// Logs the cause; the client only sees a generic message
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Request failed: {}", cause);
        Self::new("INTERNAL_ERROR", "Something went wrong, please try again later")
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" | "INVALID_TRANSITION" => StatusCode::CONFLICT,
            "TOO_MANY_REQUESTS" => StatusCode::TOO_MANY_REQUESTS,
            "EXTERNAL_SERVICE_ERROR" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Forbidden => ApiError::forbidden(e.to_string()),
            AuthError::Encoding(_) => ApiError::internal_error(e),
            _ => ApiError::unauthorized(e.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Validation(msg) => ApiError::validation_error(msg),
            LedgerError::NotFound(_) => ApiError::not_found(e.to_string()),
            LedgerError::Forbidden => ApiError::forbidden(e.to_string()),
            LedgerError::InvalidTransition { .. } => ApiError::new("INVALID_TRANSITION", e.to_string()),
            LedgerError::Conflict => ApiError::conflict(e.to_string()),
            LedgerError::ExternalService(ref cause) => {
                tracing::warn!("Payment link issuance failed: {}", cause);
                ApiError::new("EXTERNAL_SERVICE_ERROR", e.to_string())
            }
            LedgerError::Internal(cause) => ApiError::internal_error(format!("{:#}", cause)),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Validation(msg) => ApiError::validation_error(msg),
            AccountError::InvalidOtp => ApiError::validation_error(e.to_string()),
            AccountError::EmailTaken => ApiError::conflict(e.to_string()),
            AccountError::InvalidCredentials => ApiError::unauthorized(e.to_string()),
            AccountError::NotFound => ApiError::not_found(e.to_string()),
            AccountError::Auth(auth) => auth.into(),
            AccountError::Internal(cause) => ApiError::internal_error(format!("{:#}", cause)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingStatus;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let h = headers(&[("authorization", "Bearer test-token-123")]);
        assert_eq!(extract_session_token(&h), Some("test-token-123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let h = headers(&[("cookie", "theme=dark; token=test-token-456")]);
        assert_eq!(extract_session_token(&h), Some("test-token-456".to_string()));
    }

    #[test]
    fn test_extract_session_token_bearer_priority() {
        let h = headers(&[
            ("authorization", "Bearer bearer-token"),
            ("cookie", "token=cookie-token"),
        ]);
        assert_eq!(extract_session_token(&h), Some("bearer-token".to_string()));
    }

    #[test]
    fn test_extract_session_token_none() {
        assert!(extract_session_token(&HeaderMap::new()).is_none());
        assert!(extract_session_token(&headers(&[("authorization", "Basic abc")])).is_none());
        assert!(extract_session_token(&headers(&[("cookie", "token=")])).is_none());
        assert!(extract_session_token(&headers(&[("cookie", "xtoken=abc")])).is_none());
    }

    #[test]
    fn test_forwarded_address_precedence() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(forwarded_address(&h), Some("203.0.113.7".to_string()));

        let h = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(forwarded_address(&h), Some("198.51.100.2".to_string()));

        assert_eq!(forwarded_address(&HeaderMap::new()), None);
    }

    #[test]
    fn test_client_identity_ignores_forwarded_headers_by_default() {
        let peer: SocketAddr = "192.0.2.10:51000".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.7"), ("x-real-ip", "198.51.100.2")]);

        assert_eq!(resolve_client(&h, Some(peer), false), "192.0.2.10");
        assert_eq!(resolve_client(&h, None, false), "unknown");
        assert_eq!(resolve_client(&HeaderMap::new(), None, false), "unknown");
    }

    #[test]
    fn test_client_identity_behind_trusted_proxy() {
        let peer: SocketAddr = "10.0.0.1:51000".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);

        assert_eq!(resolve_client(&h, Some(peer), true), "203.0.113.7");
        // No forwarded header: fall back to the peer
        assert_eq!(resolve_client(&HeaderMap::new(), Some(peer), true), "10.0.0.1");
    }

    #[test]
    fn test_parse_json_maps_to_validation_error() {
        let err = parse_json::<serde_json::Value>(b"{not json").unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let value: serde_json::Value = parse_json(br#"{"a":1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_ledger_error_status_mapping() {
        let cases = [
            (LedgerError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (LedgerError::NotFound("Booking"), StatusCode::NOT_FOUND),
            (LedgerError::Forbidden, StatusCode::FORBIDDEN),
            (LedgerError::Conflict, StatusCode::CONFLICT),
            (
                LedgerError::ExternalService(crate::services::PaymentLinkError::NotConfigured),
                StatusCode::BAD_GATEWAY,
            ),
            (
                LedgerError::Internal(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }

        let invalid = ApiError::from(LedgerError::InvalidTransition {
            from: BookingStatus::Rejected,
            to: BookingStatus::PaymentPending,
        });
        assert_eq!(invalid.status(), StatusCode::CONFLICT);
        assert_eq!(invalid.code, "INVALID_TRANSITION");
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = ApiError::from(AccountError::Internal(anyhow::anyhow!("secret dsn")));
        assert!(!err.message.contains("secret dsn"));
    }

    #[test]
    fn test_auth_error_mapping() {
        assert_eq!(ApiError::from(AuthError::Revoked).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(AuthError::StoreUnavailable).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::from(AuthError::Forbidden).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_too_many_requests_body() {
        let reset = Utc::now();
        let json = serde_json::to_value(ApiError::too_many_requests("Slow down", reset)).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["remaining"], 0);
        assert_eq!(json["message"], "Slow down");
        assert!(json["resetTime"].is_string());

        let plain = serde_json::to_value(ApiError::not_found("x")).unwrap();
        assert!(plain.get("remaining").is_none());
        assert!(plain.get("resetTime").is_none());
    }
}
