use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::dispatch::{DispatchEngine, DispatchError};
use super::domain::{OfferResponse, OrderId, OrderRequest};
use super::tiering::CompletionReport;

/// Router builder exposing order intake, vendor responses, and tier maintenance.
pub fn dispatch_router(engine: Arc<DispatchEngine>) -> Router {
    Router::new()
        .route("/api/v1/orders", post(create_handler))
        .route("/api/v1/orders/:order_id", get(status_handler))
        .route("/api/v1/orders/:order_id/responses", post(response_handler))
        .route("/api/v1/orders/:order_id/cancel", post(cancel_handler))
        .route("/api/v1/orders/:order_id/completion", post(completion_handler))
        .route("/api/v1/orders/:order_id/decision", get(decision_handler))
        .route("/api/v1/vendors/recalculate", post(recalculate_handler))
        .with_state(engine)
}

pub(crate) async fn create_handler(
    State(engine): State<Arc<DispatchEngine>>,
    axum::Json(request): axum::Json<OrderRequest>,
) -> Response {
    match engine.create_order(request) {
        Ok(order_id) => {
            let payload = json!({
                "order_id": order_id,
                "status": "pending",
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn status_handler(
    State(engine): State<Arc<DispatchEngine>>,
    Path(order_id): Path<String>,
) -> Response {
    match engine.order_status(&OrderId(order_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn response_handler(
    State(engine): State<Arc<DispatchEngine>>,
    Path(order_id): Path<String>,
    axum::Json(response): axum::Json<OfferResponse>,
) -> Response {
    let order_id = OrderId(order_id);
    let vendor_id = response.vendor_id.clone();
    match engine.respond_offer(&order_id, response) {
        Ok(outcome) => {
            let payload = json!({
                "order_id": order_id,
                "vendor_id": vendor_id,
                "outcome": outcome,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn cancel_handler(
    State(engine): State<Arc<DispatchEngine>>,
    Path(order_id): Path<String>,
) -> Response {
    let order_id = OrderId(order_id);
    match engine.cancel_order(&order_id) {
        Ok(()) => {
            let payload = json!({
                "order_id": order_id,
                "status": "cancelled",
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn completion_handler(
    State(engine): State<Arc<DispatchEngine>>,
    Path(order_id): Path<String>,
    axum::Json(report): axum::Json<CompletionReport>,
) -> Response {
    match engine.complete_order(&OrderId(order_id), report) {
        Ok(ack) => (StatusCode::OK, axum::Json(ack)).into_response(),
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn decision_handler(
    State(engine): State<Arc<DispatchEngine>>,
    Path(order_id): Path<String>,
) -> Response {
    let order_id = OrderId(order_id);
    match engine.decision(&order_id) {
        Ok(Some(decision)) => (StatusCode::OK, axum::Json(decision)).into_response(),
        Ok(None) => {
            let payload = json!({
                "order_id": order_id,
                "error": "routing decision pending",
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

pub(crate) async fn recalculate_handler(State(engine): State<Arc<DispatchEngine>>) -> Response {
    match engine.recalculate_tiers() {
        Ok(changes) => {
            let payload = json!({
                "changed": changes.len(),
                "changes": changes,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error.into_response(),
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::UnknownOrder(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidOrder(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::InvalidTransition { .. } => StatusCode::CONFLICT,
            DispatchError::Directory(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let payload = json!({
            "error": self.to_string(),
        });
        (status, axum::Json(payload)).into_response()
    }
}
