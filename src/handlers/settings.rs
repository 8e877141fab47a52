use crate::handlers::common::{map_service_error, success_response};
use crate::{
    errors::ApiError, services::settings::UpdateSettingsInput, ApiResponse, AppState,
};
use axum::{
    extract::{Json, State},
    routing::{get, put},
    Router,
};

/// Creates the router for settings endpoints
pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_settings))
        .route("/", put(update_settings))
}

/// Get the current settings row
async fn get_settings(
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let settings = state
        .services
        .settings
        .get_settings()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApiResponse::success(settings)))
}

/// Update settings; requires the admin security code. A wrong code yields a
/// structured `success = false` body, not an error status.
async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingsInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let update = state
        .services
        .settings
        .update_settings(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(update))
}
