//! Restaurant API endpoints
//!
//! - POST /api/restaurants - create (owner)
//! - GET /api/restaurants/mine - the caller's restaurants (owner)
//! - GET /api/restaurants/{id}/bookings - bookings of one restaurant (its owner)

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::api::responses::{ApiResponse, RestaurantResponse};
use crate::models::{Restaurant, Role};

const MAX_NAME_LEN: usize = 120;

#[derive(Debug, Deserialize)]
pub struct CreateRestaurantRequest {
    pub name: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_restaurant))
        .route("/mine", get(list_mine))
        .route("/{id}/bookings", get(list_bookings))
}

/// POST /api/restaurants
async fn create_restaurant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRestaurantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.authenticate(&headers, Some(Role::Owner)).await?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation_error("Restaurant name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::validation_error(format!(
            "Restaurant name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }

    let restaurant = Restaurant::new(
        uuid::Uuid::new_v4().to_string(),
        owner.id().to_string(),
        name.to_string(),
    );
    let restaurant = state
        .restaurants
        .create(&restaurant)
        .await
        .map_err(ApiError::internal_error)?;

    tracing::info!("Restaurant {} created by {}", restaurant.id, restaurant.owner_id);
    Ok(ApiResponse::created(RestaurantResponse::from(restaurant)))
}

/// GET /api/restaurants/mine
async fn list_mine(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.authenticate(&headers, Some(Role::Owner)).await?;
    let restaurants = state
        .restaurants
        .list_by_owner(owner.id())
        .await
        .map_err(ApiError::internal_error)?;

    Ok(ApiResponse::ok(
        restaurants
            .into_iter()
            .map(RestaurantResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// GET /api/restaurants/{id}/bookings
async fn list_bookings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner = state.authenticate(&headers, Some(Role::Owner)).await?;
    let bookings = state.ledger.list_for_restaurant(&id, owner.id()).await?;
    Ok(ApiResponse::ok(bookings))
}
