//! Session token claims

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::Role;

/// Claims signed into every session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user id); empty when the claim is missing
    #[serde(default)]
    pub sub: String,
    /// Role at issue time
    pub role: Role,
    /// Issued-at (Unix seconds)
    pub iat: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
    /// Token id; the revocation handle
    pub jti: String,
}

impl SessionClaims {
    /// Check if the token has expired
    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}
