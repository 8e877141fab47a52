use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, services::cart::AddBundleToCartInput, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post},
    Router,
};

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/items", post(add_bundle_to_cart))
        .route("/:parent_id", get(get_cart))
        .route("/:parent_id/items/:bundle_id", delete(remove_from_cart))
}

/// Add a bundle for a student to the parent's cart
async fn add_bundle_to_cart(
    State(state): State<AppState>,
    Json(payload): Json<AddBundleToCartInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .add_bundle_to_cart(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Get the parent's cart with items
async fn get_cart(
    State(state): State<AppState>,
    Path(parent_id): Path<i64>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(parent_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

/// Remove a bundle from the parent's cart
async fn remove_from_cart(
    State(state): State<AppState>,
    Path((parent_id, bundle_id)): Path<(i64, i64)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_from_cart(parent_id, bundle_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
