use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use super::handlers::{
    get_metric, get_report, health_check, record_event, resolve_scope, update_metrics, AppState,
};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", post(record_event))
        .route("/statistics/{composite}", get(get_report))
        .route("/metrics/update", post(update_metrics))
        .route("/metrics/{subject_id}/{metric_type}", get(get_metric))
        .route("/scopes/{node_id}/facets", get(resolve_scope))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
