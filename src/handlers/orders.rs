use crate::handlers::common::{created_response, map_service_error, success_response};
use crate::{
    entities::payment::PaymentMethod,
    errors::ApiError,
    services::orders::{
        BulkUpdateOrderStatusInput, BulkUpdateTransactionStatusInput, OrderPlacement,
        PlaceOrderInput, UpdateOrderStatusInput, UpdateTransactionStatusInput,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", post(place_order_from_cart))
        .route("/", get(list_orders))
        .route("/parent/:parent_id", get(list_orders_by_parent))
        .route("/:id/status", put(update_status))
        .route("/:id/transaction-status", put(update_transaction_status))
        .route("/bulk-delivery-status", post(bulk_update_status))
        .route(
            "/bulk-transaction-status",
            post(bulk_update_transaction_status),
        )
}

#[derive(Debug, Deserialize)]
struct PlaceOrderRequest {
    parent_id: i64,
    shipping_method: String,
    payment_method: Option<PaymentMethod>,
    #[serde(default)]
    is_address_edited: bool,
    delivery_address: Option<String>,
}

/// Place an order from the parent's cart
async fn place_order_from_cart(
    State(state): State<AppState>,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let Some(payment_method) = payload.payment_method else {
        return Err(ApiError::BadRequest("Payment method is required".to_string()));
    };

    let input = PlaceOrderInput {
        parent_id: payload.parent_id,
        shipping_method: payload.shipping_method,
        payment_method,
        is_address_edited: payload.is_address_edited,
        delivery_address: payload.delivery_address,
    };

    match state
        .services
        .orders
        .place_order_from_cart(input)
        .await
        .map_err(map_service_error)?
    {
        OrderPlacement::Placed(details) => Ok(created_response(ApiResponse::success(*details))),
        OrderPlacement::PurchasingDisabled => Ok(success_response(ApiResponse::<()>::error(
            "Purchasing is currently disabled".to_string(),
        ))),
    }
}

/// Get all orders
async fn list_orders(
    State(state): State<AppState>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .find_all()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApiResponse::success(orders)))
}

/// Get orders by parent id
async fn list_orders_by_parent(
    State(state): State<AppState>,
    Path(parent_id): Path<i64>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .find_by_parent(parent_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApiResponse::success(orders)))
}

/// Update order delivery status
async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApiResponse::success(order)))
}

/// Update order transaction status
async fn update_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTransactionStatusInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_transaction_status(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(ApiResponse::success(order)))
}

/// Bulk update delivery statuses; per-item failures are reported, not raised
async fn bulk_update_status(
    State(state): State<AppState>,
    Json(payload): Json<BulkUpdateOrderStatusInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .orders
        .bulk_update_status(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}

/// Bulk update transaction statuses; per-item failures are reported, not raised
async fn bulk_update_transaction_status(
    State(state): State<AppState>,
    Json(payload): Json<BulkUpdateTransactionStatusInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .orders
        .bulk_update_transaction_status(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}
