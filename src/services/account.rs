//! Account service
//!
//! Signup is gated by a one-time code mailed to the address first
//! (`send_otp`). Codes live in the shared store under `otp:<email>` for ten
//! minutes and are consumed by a successful signup. Login issues a session
//! token through the [`TokenAuthority`]; logout revokes it.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::repositories::UserRepository;
use crate::models::{Role, User};
use crate::services::email::{generate_verification_code, EmailNotifier, EmailTemplate};
use crate::services::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::services::token::{AuthError, IssuedToken, TokenAuthority};
use crate::store::DynKeyValueStore;

const OTP_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Invalid or expired verification code")]
    InvalidOtp,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account not found")]
    NotFound,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendOtpInput {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupInput {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Role,
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    store: DynKeyValueStore,
    email: Arc<dyn EmailNotifier>,
    tokens: Arc<TokenAuthority>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        store: DynKeyValueStore,
        email: Arc<dyn EmailNotifier>,
        tokens: Arc<TokenAuthority>,
    ) -> Self {
        Self {
            users,
            store,
            email,
            tokens,
        }
    }

    /// Store a fresh code for `email` and mail it
    pub async fn send_otp(&self, input: SendOtpInput) -> Result<(), AccountError> {
        let email = normalize_email(&input.email)?;
        let code = generate_verification_code()?;

        self.store
            .set_with_ttl(&otp_key(&email), &code, OTP_TTL)
            .await?;

        self.email
            .send(
                EmailTemplate::Otp,
                &email,
                &json!({ "code": code, "minutes": OTP_TTL.as_secs() / 60 }),
            )
            .await?;

        tracing::info!("Verification code sent to {}", email);
        Ok(())
    }

    /// Create an account after checking the mailed code
    pub async fn signup(&self, input: SignupInput) -> Result<User, AccountError> {
        let email = normalize_email(&input.email)?;
        let name = input.name.trim();
        if name.is_empty() {
            return Err(AccountError::Validation("Name is required".to_string()));
        }
        if input.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let key = otp_key(&email);
        match self.store.get(&key).await? {
            Some(code) if code == input.otp.trim() => {}
            _ => return Err(AccountError::InvalidOtp),
        }

        if self.users.exists_by_email(&email).await? {
            return Err(AccountError::EmailTaken);
        }

        let user = User::new(
            uuid::Uuid::new_v4().to_string(),
            name.to_string(),
            email,
            hash_password(&input.password)?,
            input.role,
        );
        let user = self.users.create(&user).await?;

        if let Err(e) = self.store.delete(&key).await {
            tracing::warn!("Failed to consume verification code: {:#}", e);
        }

        tracing::info!("Account {} created ({})", user.id, user.role);
        Ok(user)
    }

    /// Check credentials and issue a session token
    pub async fn login(&self, input: LoginInput) -> Result<(User, IssuedToken), AccountError> {
        let email = input.email.trim().to_lowercase();
        let user = self
            .users
            .get_by_email(&email)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if !verify_password(&input.password, &user.password_hash)? {
            return Err(AccountError::InvalidCredentials);
        }

        let issued = self.tokens.issue(&user.id, user.role)?;
        Ok((user, issued))
    }

    /// Revoke the caller's token. Never fails; problems are logged.
    pub async fn logout(&self, token: Option<&str>) {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return;
        };
        match self.tokens.revoke(token).await {
            Ok(()) => tracing::debug!("Session revoked"),
            Err(e) => tracing::warn!("Logout could not revoke session: {}", e),
        }
    }

    pub async fn me(&self, user_id: &str) -> Result<User, AccountError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(AccountError::NotFound)
    }
}

fn otp_key(email: &str) -> String {
    format!("otp:{}", email)
}

fn normalize_email(email: &str) -> Result<String, AccountError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AccountError::Validation("Invalid email address".to_string()));
    }
    Ok(email)
}
