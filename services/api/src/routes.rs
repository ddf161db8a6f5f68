use crate::infra::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use notary_dispatch::routing::{dispatch_router, DispatchEngine, VendorStanding};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub(crate) struct StandingsResponse {
    pub(crate) count: usize,
    pub(crate) standings: Vec<VendorStanding>,
}

pub(crate) fn with_dispatch_routes(engine: Arc<DispatchEngine>) -> axum::Router {
    let standings = axum::Router::new()
        .route(
            "/api/v1/vendors/standings",
            axum::routing::get(standings_endpoint),
        )
        .with_state(Arc::clone(&engine));

    dispatch_router(engine)
        .merge(standings)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Latest tier assessments; vendors without completion history are not listed.
pub(crate) async fn standings_endpoint(
    State(engine): State<Arc<DispatchEngine>>,
) -> Json<StandingsResponse> {
    let standings = engine.recalculator().standings().all();
    Json(StandingsResponse {
        count: standings.len(),
        standings,
    })
}
