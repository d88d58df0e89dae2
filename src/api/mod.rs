//! API layer - HTTP handlers and routing
//!
//! Everything is served under `/api`:
//! - `auth`: OTP signup, login, logout, current account
//! - `restaurants`: owner restaurants and their booking lists
//! - `bookings`: create, accept/reject, customer history
//! - `payments`: the provider's confirmation webhook
//! - `realtime`: the dashboard WebSocket
//!
//! plus an unauthenticated `/health`.

pub mod auth;
pub mod bookings;
pub mod middleware;
pub mod payments;
pub mod realtime;
pub mod responses;
pub mod restaurants;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, AuthenticatedUser, ClientIdentity};

/// Build the `/api` router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/restaurants", restaurants::router())
        .nest("/bookings", bookings::router())
        .nest("/payments", payments::router())
        .nest("/realtime", realtime::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .route("/health", get(health))
        .nest("/api", build_api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the dashboard origin; cookies need an explicit origin
fn cors_layer(origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE]);

    let origin = origin.trim();
    if origin == "*" {
        return base.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => base.allow_origin(value).allow_credentials(true),
        Err(_) => {
            tracing::warn!("Ignoring invalid server.cors_origin {:?}", origin);
            base
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
