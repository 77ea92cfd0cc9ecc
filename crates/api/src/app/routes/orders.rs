use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use orderflow_core::{CustomerId, OrderId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateOrderRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text());
        }
    };

    let customer_id = CustomerId::new(body.customer_id);
    let items = body.order_items();

    // Publishing may back off between retries; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || {
        services.order_service().create_order(customer_id, &items)
    })
    .await;

    match result {
        Ok(Ok(order)) => (StatusCode::CREATED, Json(dto::OrderResponse::from(&order))).into_response(),
        Ok(Err(e)) => errors::order_error_to_response(e),
        Err(join_err) => errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            join_err.to_string(),
        ),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: OrderId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"),
    };

    match services.order_service().get_order(id) {
        Ok(order) => (StatusCode::OK, Json(dto::OrderResponse::from(&order))).into_response(),
        Err(e) => errors::order_error_to_response(e),
    }
}
