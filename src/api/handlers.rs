//! API handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{bearer_user, AccessPolicy};
use crate::hierarchy::{ContentArena, SubjectType};
use crate::index::UsageIndex;
use crate::ingest::{extract_client_ip, EventRecorder, PendingEvent};
use crate::metrics::{MetricSnapshot, MetricUpdatePipeline, SnapshotStore};
use crate::reports::{self, parse_composite_key, ReportError, ReportPoint};
use crate::scope::{ScopeError, ScopeResolver};

pub struct AppState {
    pub arena: Arc<ContentArena>,
    pub index: Arc<dyn UsageIndex>,
    pub store: Arc<dyn SnapshotStore>,
    pub recorder: Arc<EventRecorder>,
    pub resolver: Arc<ScopeResolver>,
    pub policy: Arc<dyn AccessPolicy>,
    pub pipeline: Arc<MetricUpdatePipeline>,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub subject_type: SubjectType,
    pub subject_id: Uuid,
}

/// Record a view/download occurrence. Fire-and-forget: the event is
/// buffered and resolved off the request path.
pub async fn record_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RecordEventRequest>,
) -> impl IntoResponse {
    let Some(node) = state.arena.get(req.subject_id) else {
        return error_body(StatusCode::NOT_FOUND, format!("no such subject {}", req.subject_id));
    };
    if node.subject_type != req.subject_type {
        return error_body(
            StatusCode::BAD_REQUEST,
            format!("subject {} is a {}, not a {}", req.subject_id, node.subject_type, req.subject_type),
        );
    }

    // A bitstream view counts as a download when the bitstream hangs off an item.
    let is_download = req.subject_type == SubjectType::Bitstream
        && state
            .arena
            .parent(req.subject_id)
            .map(|p| p.subject_type == SubjectType::Item)
            .unwrap_or(false);

    state.recorder.record_event(PendingEvent {
        subject_type: req.subject_type,
        subject_id: req.subject_id,
        timestamp: chrono::Utc::now().timestamp(),
        client_ip: extract_client_ip(&headers, None),
        is_download,
    });

    StatusCode::ACCEPTED.into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReportQueryParams {
    /// Start time, inclusive (Unix timestamp)
    pub start_time: Option<i64>,

    /// End time, exclusive (Unix timestamp)
    pub end_time: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub id: String,
    pub report_type: String,
    pub points: Vec<ReportPoint>,
}

fn report_error_response(e: ReportError) -> Response {
    match e {
        ReportError::InvalidCompositeKey(_) | ReportError::InvalidReportTarget { .. } => {
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        ReportError::SubjectNotFound(_) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        ReportError::Index(err) => {
            tracing::error!("Failed to generate report: {err:#}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate report")
        }
    }
}

/// Generate a usage report addressed by composite key `<uuid>_<ReportId>`
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(composite): Path<String>,
    Query(params): Query<ReportQueryParams>,
    headers: HeaderMap,
) -> Response {
    let (subject_id, report_id) = match parse_composite_key(&composite) {
        Ok(parsed) => parsed,
        Err(e) => return report_error_response(e),
    };

    // Authorization happens before any computation.
    let user = bearer_user(&headers);
    if !state.policy.can_read(user.as_deref(), subject_id).await {
        return error_body(StatusCode::FORBIDDEN, "read access denied");
    }

    let Some(node) = state.arena.get(subject_id) else {
        return report_error_response(ReportError::SubjectNotFound(subject_id));
    };

    let range = match (params.start_time, params.end_time) {
        (Some(start), Some(end)) => Some((start, end)),
        _ => None,
    };

    let now = chrono::Utc::now().timestamp();
    match reports::generate(report_id, state.index.as_ref(), &state.arena, node, now, range).await
    {
        Ok(points) => Json(ReportResponse {
            id: composite,
            report_type: report_id.to_string(),
            points,
        })
        .into_response(),
        Err(e) => report_error_response(e),
    }
}

#[derive(Debug, Serialize)]
pub struct MetricResponse {
    #[serde(flatten)]
    pub snapshot: MetricSnapshot,
}

/// Latest authoritative snapshot for (subject_id, metric_type)
pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path((subject_id, metric_type)): Path<(Uuid, String)>,
) -> Response {
    match state.store.latest(subject_id, &metric_type).await {
        Ok(Some(snapshot)) => Json(MetricResponse { snapshot }).into_response(),
        Ok(None) => error_body(
            StatusCode::NOT_FOUND,
            format!("no {metric_type} metric for subject {subject_id}"),
        ),
        Err(e) => {
            tracing::error!("Failed to load metric snapshot: {e:#}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load metric")
        }
    }
}

/// Trigger one metric update pipeline run
pub async fn update_metrics(State(state): State<Arc<AppState>>) -> Response {
    let summary = state.pipeline.run(chrono::Utc::now().timestamp()).await;
    Json(summary).into_response()
}

/// Resolved facet configuration for a scope node
pub async fn resolve_scope(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<Uuid>,
) -> Response {
    match state.resolver.resolve(node_id) {
        Ok(config) => Json(config).into_response(),
        Err(ScopeError::UnknownNode(id)) => {
            error_body(StatusCode::NOT_FOUND, format!("no such scope node {id}"))
        }
    }
}
