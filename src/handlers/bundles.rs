use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{errors::ApiError, services::bundles::CreateBundleInput, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};

/// Creates the router for bundle endpoints
pub fn bundles_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_bundle))
        .route("/", get(list_bundles))
        .route("/:id", get(get_bundle))
}

/// Create a bundle with its product lines
async fn create_bundle(
    State(state): State<AppState>,
    Json(payload): Json<CreateBundleInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let bundle = state
        .services
        .bundles
        .create_bundle(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(bundle))
}

/// List all bundles
async fn list_bundles(
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let bundles = state
        .services
        .bundles
        .list_bundles()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(bundles))
}

/// Get one bundle with its product lines
async fn get_bundle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let bundle = state
        .services
        .bundles
        .get_bundle(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(bundle))
}
