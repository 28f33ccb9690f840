use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::server::state::AppState;

/// A node whose policy has been set
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Controller status report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub selector: String,
    pub security_policy: String,
    pub project: String,
    pub ready: bool,
    pub processed: usize,
    pub nodes: Vec<NodeStatus>,
}

/// Liveness check
pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness check, unavailable until the node cache has synced
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Processed node report
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let reconciler = &state.reconciler;
    let nodes: Vec<NodeStatus> = reconciler
        .processed()
        .entries()
        .into_iter()
        .map(|(name, applied_at)| NodeStatus { name, applied_at })
        .collect();

    Json(ControllerStatus {
        selector: reconciler.selector().to_string(),
        security_policy: reconciler.applier().policy_url().to_string(),
        project: reconciler.applier().project_id().to_string(),
        ready: state.is_ready(),
        processed: nodes.len(),
        nodes,
    })
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
