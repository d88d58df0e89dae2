//! Authentication API endpoints
//!
//! - POST /api/auth/send-otp - mail a signup code
//! - POST /api/auth/signup - create an account
//! - POST /api/auth/login - issue a session token (also set as cookie)
//! - POST /api/auth/logout - revoke the token and redirect
//! - GET /api/auth/me - current account

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::api::middleware::{
    extract_session_token, parse_json, ApiError, AppState, AuthenticatedUser, ClientIdentity,
    SESSION_COOKIE,
};
use crate::api::responses::{ApiResponse, MessageResponse, UserResponse};
use crate::services::{LoginInput, SendOtpInput, SignupInput};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserResponse,
    pub token: String,
    pub expires_at: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send-otp", post(send_otp))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

/// POST /api/auth/send-otp
async fn send_otp(
    State(state): State<AppState>,
    identity: ClientIdentity,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.admit(&identity, &state.config.rate_limit.otp_send).await?;
    let body: SendOtpInput = parse_json(&body)?;
    state.accounts.send_otp(body).await?;
    Ok(ApiResponse::ok(MessageResponse::new("Verification code sent")))
}

/// POST /api/auth/signup
async fn signup(
    State(state): State<AppState>,
    identity: ClientIdentity,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.admit(&identity, &state.config.rate_limit.signup).await?;
    let body: SignupInput = parse_json(&body)?;
    let user = state.accounts.signup(body).await?;
    Ok(ApiResponse::created(UserResponse::from(user)))
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    identity: ClientIdentity,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.admit(&identity, &state.config.rate_limit.login).await?;
    let body: LoginInput = parse_json(&body)?;
    let (user, issued) = state.accounts.login(body).await?;

    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        issued.token,
        state.tokens.ttl().as_secs()
    );
    if state.config.auth.secure_cookie {
        cookie.push_str("; Secure");
    }
    let cookie = HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, cookie);

    Ok((
        headers,
        ApiResponse::ok(LoginResponse {
            user: user.into(),
            token: issued.token,
            expires_at: issued.claims.expires_at().to_rfc3339(),
        }),
    ))
}

/// POST /api/auth/logout
///
/// Always clears the cookie and redirects, whatever happened to the token.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let token = extract_session_token(&headers);
    state.accounts.logout(token.as_deref()).await;

    let clear = HeaderValue::from_static("token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, clear);

    (
        response_headers,
        Redirect::to(&state.config.server.logout_redirect),
    )
}

/// GET /api/auth/me
async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.accounts.me(user.id()).await?;
    Ok(ApiResponse::ok(UserResponse::from(account)))
}
