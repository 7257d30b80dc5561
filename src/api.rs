//! HTTP surface: the analysis endpoint plus health, debug, and admin routes.
//! All business logic lives in the orchestrator; handlers only translate
//! between JSON and the envelope types.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::counters::CountersSnapshot;
use crate::orchestrator::{AnalysisRequest, AnalysisResponse, Orchestrator};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/analyze", post(analyze))
        .route("/debug/counters", get(debug_counters))
        .route("/admin/reset-counters", post(admin_reset_counters))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalysisRequest>,
) -> Json<AnalysisResponse> {
    Json(state.orchestrator.analyze(&req).await)
}

async fn debug_counters(State(state): State<AppState>) -> Json<CountersSnapshot> {
    Json(state.orchestrator.counters().snapshot())
}

async fn admin_reset_counters(State(state): State<AppState>) -> &'static str {
    state.orchestrator.counters().reset();
    "reset"
}
