use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orderflow_infra::OrderError;

pub fn order_error_to_response(err: OrderError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        OrderError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        OrderError::CustomerNotFound(_) => {
            json_error(StatusCode::BAD_REQUEST, "customer_not_found", message)
        }
        OrderError::ProductNotFound(_) => {
            json_error(StatusCode::BAD_REQUEST, "product_not_found", message)
        }
        OrderError::OrderNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        OrderError::InvalidTransition(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition", message)
        }
        OrderError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        OrderError::Store(_) => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message),
        // The order exists; hand its id back so the caller can poll it.
        OrderError::Publish { order_id, .. } => (
            StatusCode::BAD_GATEWAY,
            axum::Json(json!({
                "error": "publish_error",
                "message": message,
                "order_id": order_id,
            })),
        )
            .into_response(),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
