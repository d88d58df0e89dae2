//! Session token authority
//!
//! Tokens are stateless: `base64url(claims-json) "." base64url(hmac-sha256)`.
//! Nothing is stored while a token is valid. Logging out writes a revocation
//! marker `revoked:<jti>` whose TTL is the token's remaining lifetime, so
//! markers disappear together with the tokens they block.
//!
//! Verification order:
//! 1. token absent
//! 2. signature or expiry check fails
//! 3. subject claim missing
//! 4. revocation marker present (store failure counts as revoked)
//! 5. role mismatch against the caller's requirement

use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Role, SessionClaims};
use crate::store::DynKeyValueStore;

type HmacSha256 = Hmac<Sha256>;

const REVOKED_PREFIX: &str = "revoked:";

/// Token verification errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Session expired")]
    Expired,

    #[error("Session has been revoked")]
    Revoked,

    /// The revocation state could not be read
    #[error("Session could not be verified")]
    StoreUnavailable,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Failed to encode session token: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl AuthError {
    /// Everything except `Forbidden` means "not authenticated"
    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, AuthError::Forbidden | AuthError::Encoding(_))
    }
}

/// A freshly minted token with its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// Issues, verifies and revokes session tokens
pub struct TokenAuthority {
    mac: HmacSha256,
    ttl: Duration,
    store: DynKeyValueStore,
}

impl TokenAuthority {
    /// Create an authority signing with `secret`
    pub fn new(secret: &str, ttl: Duration, store: DynKeyValueStore) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("Token secret must not be empty");
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid token secret: {}", e))?;
        Ok(Self { mac, ttl, store })
    }

    /// Token lifetime, also used as the cookie Max-Age
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a signed token for `subject_id`
    pub fn issue(&self, subject_id: &str, role: Role) -> Result<IssuedToken, AuthError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = SessionClaims {
            sub: subject_id.to_string(),
            role,
            iat,
            exp: iat.saturating_add(ttl),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = self.encode(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Authenticate a request's token, optionally requiring a role
    pub async fn verify(
        &self,
        token: Option<&str>,
        required: Option<Role>,
    ) -> Result<SessionClaims, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.decode(token)?;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        self.check_revocation(&claims).await?;

        if let Some(role) = required {
            if claims.role != role {
                return Err(AuthError::Forbidden);
            }
        }

        Ok(claims)
    }

    /// Re-check claims that were verified earlier
    ///
    /// Long-lived connections call this to notice a session that expired or
    /// was revoked after they were opened.
    pub async fn recheck(&self, claims: &SessionClaims) -> Result<(), AuthError> {
        if claims.is_expired() {
            return Err(AuthError::Expired);
        }
        self.check_revocation(claims).await
    }

    async fn check_revocation(&self, claims: &SessionClaims) -> Result<(), AuthError> {
        match self.store.exists(&revocation_key(&claims.jti)).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(AuthError::Revoked),
            Err(e) => {
                tracing::warn!("Revocation lookup failed, rejecting token: {:#}", e);
                Err(AuthError::StoreUnavailable)
            }
        }
    }

    /// Revoke a token for the rest of its lifetime
    ///
    /// Revoking an already expired or already revoked token is a no-op.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let claims = match self.decode(token) {
            Ok(claims) => claims,
            Err(AuthError::Expired) => return Ok(()),
            Err(e) => return Err(e),
        };

        let remaining = claims.exp - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }

        self.store
            .set_with_ttl(
                &revocation_key(&claims.jti),
                &claims.sub,
                Duration::from_secs(remaining.unsigned_abs()),
            )
            .await
            .map_err(|e| {
                tracing::warn!("Failed to write revocation marker: {:#}", e);
                AuthError::StoreUnavailable
            })
    }

    fn encode(&self, claims: &SessionClaims) -> Result<String, AuthError> {
        let payload = BASE64URL_NOPAD.encode(&serde_json::to_vec(claims)?);
        let signature = self
            .mac
            .clone()
            .chain_update(payload.as_bytes())
            .finalize()
            .into_bytes();
        Ok(format!("{}.{}", payload, BASE64URL_NOPAD.encode(&signature)))
    }

    /// Check signature and expiry, returning the claims
    fn decode(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let signature = BASE64URL_NOPAD
            .decode(signature.as_bytes())
            .map_err(|_| AuthError::InvalidToken)?;

        self.mac
            .clone()
            .chain_update(payload.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let json = BASE64URL_NOPAD
            .decode(payload.as_bytes())
            .map_err(|_| AuthError::InvalidToken)?;
        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|_| AuthError::InvalidToken)?;

        if claims.is_expired() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn revocation_key(jti: &str) -> String {
    format!("{}{}", REVOKED_PREFIX, jti)
}
