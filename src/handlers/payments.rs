use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

/// Creates the router for payment endpoints
pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(payment_webhook))
        .route("/success", post(payment_success))
        .route("/error", post(payment_error))
        .route("/closed", post(payment_closed))
        .route("/config/:order_id", get(payment_config))
        .route("/order/:order_id", get(payment_for_order))
}

/// What a webhook envelope asks us to do with its payload.
#[derive(Debug, PartialEq, Eq)]
enum WebhookKind {
    Captured,
    Failed,
    Closed,
    Unhandled,
}

/// Classify an inbound gateway event by its type discriminator. The
/// recurring-payment provider variant nests the decisive field inside the
/// payload instead.
fn classify_webhook(event_type: &str, data: &Value) -> WebhookKind {
    match event_type {
        "dt.payment.captured" => WebhookKind::Captured,
        "dt.payment.failed" => WebhookKind::Failed,
        "dt.payment.closed" => WebhookKind::Closed,
        "MONTHLY-EMI" => {
            if data.get("event").and_then(|v| v.as_str()) == Some("emi.form.submit") {
                WebhookKind::Captured
            } else if data.get("error").map_or(false, |e| !e.is_null()) {
                WebhookKind::Failed
            } else {
                WebhookKind::Unhandled
            }
        }
        _ => WebhookKind::Unhandled,
    }
}

/// Single webhook ingress for the payment gateway. Unrecognized event types
/// are acknowledged, never failed.
async fn payment_webhook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let event_type = body.get("type").and_then(|v| v.as_str());
    let data = body.get("data").filter(|d| !d.is_null());

    let (Some(event_type), Some(data)) = (event_type, data) else {
        return Err(ApiError::BadRequest("Invalid webhook payload".to_string()));
    };

    match classify_webhook(event_type, data) {
        WebhookKind::Captured => {
            info!("Processing successful payment webhook: {}", event_type);
            let outcome = state
                .services
                .payments
                .mark_paid(data.clone())
                .await
                .map_err(map_service_error)?;
            Ok(success_response(outcome))
        }
        WebhookKind::Failed => {
            warn!("Processing failed payment webhook: {}", event_type);
            let outcome = state
                .services
                .payments
                .mark_failed(data.clone())
                .await
                .map_err(map_service_error)?;
            Ok(success_response(outcome))
        }
        WebhookKind::Closed => {
            info!("Processing abandoned checkout webhook: {}", event_type);
            let outcome = state
                .services
                .payments
                .mark_closed(data.clone())
                .await
                .map_err(map_service_error)?;
            Ok(success_response(outcome))
        }
        WebhookKind::Unhandled => {
            info!("Unhandled payment webhook type: {}", event_type);
            Ok(success_response(serde_json::json!({ "received": true })))
        }
    }
}

/// Mark a payment captured (admin/back-office entry point)
async fn payment_success(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .payments
        .mark_paid(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}

/// Mark a payment failed
async fn payment_error(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .payments
        .mark_failed(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}

/// Record an abandoned checkout
async fn payment_closed(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let outcome = state
        .services
        .payments
        .mark_closed(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(outcome))
}

/// Checkout SDK bootstrap configuration for an order
async fn payment_config(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let session = state
        .services
        .payments
        .get_config(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

/// Latest payment for an order with its raw audit payload
async fn payment_for_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let payment = state
        .services
        .payments
        .get_payment_for_order(order_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(payment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captured_and_failed_types_classify_directly() {
        let data = serde_json::json!({});
        assert_eq!(
            classify_webhook("dt.payment.captured", &data),
            WebhookKind::Captured
        );
        assert_eq!(
            classify_webhook("dt.payment.failed", &data),
            WebhookKind::Failed
        );
        assert_eq!(
            classify_webhook("dt.payment.closed", &data),
            WebhookKind::Closed
        );
    }

    #[test]
    fn monthly_emi_uses_nested_event_field() {
        let submit = serde_json::json!({ "event": "emi.form.submit" });
        assert_eq!(classify_webhook("MONTHLY-EMI", &submit), WebhookKind::Captured);

        let errored = serde_json::json!({ "error": { "message": "declined" } });
        assert_eq!(classify_webhook("MONTHLY-EMI", &errored), WebhookKind::Failed);

        let neither = serde_json::json!({ "event": "emi.form.open" });
        assert_eq!(classify_webhook("MONTHLY-EMI", &neither), WebhookKind::Unhandled);

        let null_error = serde_json::json!({ "error": null });
        assert_eq!(
            classify_webhook("MONTHLY-EMI", &null_error),
            WebhookKind::Unhandled
        );
    }

    #[test]
    fn unknown_types_are_unhandled() {
        let data = serde_json::json!({});
        assert_eq!(
            classify_webhook("dt.refund.initiated", &data),
            WebhookKind::Unhandled
        );
    }
}
