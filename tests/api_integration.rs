//! HTTP API integration tests
//!
//! Drives the axum router directly with `tower::ServiceExt::oneshot`
//! against an in-memory SQLite backend.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use tally::api::{create_router, AppState};
use tally::auth::{AccessPolicy, AllowAll};
use tally::hierarchy::{ContentArena, SubjectType};
use tally::index::{SqliteUsageIndex, UsageIndex};
use tally::ingest::{EventRecorder, GeoLocation, ViewEvent};
use tally::metrics::{MetricUpdatePipeline, SnapshotStore, SqliteSnapshotStore};
use tally::scope::ScopeResolver;

struct TestApp {
    router: Router,
    index: Arc<dyn UsageIndex>,
    recorder: Arc<EventRecorder>,
    item: Uuid,
    collection: Uuid,
}

async fn test_app_with_policy(policy: Arc<dyn AccessPolicy>) -> TestApp {
    let mut arena = ContentArena::new();
    let site = arena.add(SubjectType::Site, "Site", None, None).unwrap();
    let community = arena
        .add(SubjectType::Community, "Research", Some(site), None)
        .unwrap();
    let collection = arena
        .add(
            SubjectType::Collection,
            "Theses",
            Some(community),
            Some("thesisConfiguration"),
        )
        .unwrap();
    let item = arena
        .add(SubjectType::Item, "A Thesis", Some(collection), None)
        .unwrap();
    arena
        .add(SubjectType::Bitstream, "thesis.pdf", Some(item), None)
        .unwrap();
    let arena = Arc::new(arena);

    let pool = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap(),
    );
    let index: Arc<dyn UsageIndex> = Arc::new(SqliteUsageIndex::with_pool(Arc::clone(&pool)));
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::with_pool(Arc::clone(&pool)));
    index.init().await.unwrap();
    store.init().await.unwrap();

    let recorder = Arc::new(EventRecorder::new_with_config(1000, 10));
    let resolver = Arc::new(ScopeResolver::new(
        Arc::clone(&arena),
        "defaultConfiguration",
    ));
    let pipeline = Arc::new(MetricUpdatePipeline::new(
        Arc::clone(&index),
        Arc::clone(&store),
        Arc::clone(&arena),
    ));

    let state = Arc::new(AppState {
        arena,
        index: Arc::clone(&index),
        store,
        recorder: Arc::clone(&recorder),
        resolver,
        policy,
        pipeline,
    });

    TestApp {
        router: create_router(state),
        index,
        recorder,
        item,
        collection,
    }
}

async fn test_app() -> TestApp {
    test_app_with_policy(Arc::new(AllowAll)).await
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let app = test_app().await;
    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn total_visits_report_returns_points() {
    let app = test_app().await;

    app.index
        .record_batch(vec![ViewEvent {
            subject_type: SubjectType::Item,
            subject_id: app.item,
            timestamp: Utc::now().timestamp() - 60,
            geo: GeoLocation::default(),
            client_ip: None,
            is_download: false,
        }])
        .await
        .unwrap();

    let uri = format!("/statistics/{}_TotalVisits", app.item);
    let response = app.router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["report_type"], "TotalVisits");
    assert_eq!(body["points"][0]["views"], 1);
    assert_eq!(body["points"][0]["label"], "A Thesis");
}

#[tokio::test]
async fn malformed_composite_key_is_bad_request() {
    let app = test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(get("/statistics/not-a-uuid_TotalVisits"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .oneshot(get(&format!("/statistics/{}_NoSuchReport", app.item)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn report_for_unknown_subject_is_not_found() {
    let app = test_app().await;
    let uri = format!("/statistics/{}_TotalVisits", Uuid::new_v4());
    let response = app.router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn downloads_report_on_container_is_bad_request() {
    let app = test_app().await;
    let uri = format!("/statistics/{}_TotalDownloads", app.collection);
    let response = app.router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

struct DenyAll;

#[async_trait::async_trait]
impl AccessPolicy for DenyAll {
    async fn can_read(&self, _user: Option<&str>, _subject_id: Uuid) -> bool {
        false
    }
}

#[tokio::test]
async fn denied_reader_gets_forbidden() {
    let app = test_app_with_policy(Arc::new(DenyAll)).await;
    let uri = format!("/statistics/{}_TotalVisits", app.item);
    let response = app.router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn recorded_event_lands_in_the_buffer() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(post_json(
            "/events",
            json!({ "subject_type": "item", "subject_id": app.item }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Shutdown flushes the actor's local buffer into the shared one.
    app.recorder.shutdown().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let pending = app.recorder.drain_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].subject_id, app.item);
    assert!(!pending[0].is_download);
}

#[tokio::test]
async fn event_for_unknown_subject_is_not_found() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(post_json(
            "/events",
            json!({ "subject_type": "item", "subject_id": Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_with_mismatched_type_is_bad_request() {
    let app = test_app().await;

    let response = app
        .router
        .oneshot(post_json(
            "/events",
            json!({ "subject_type": "collection", "subject_id": app.item }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_update_then_fetch_latest_snapshot() {
    let app = test_app().await;

    app.index
        .record_batch(vec![ViewEvent {
            subject_type: SubjectType::Item,
            subject_id: app.item,
            timestamp: Utc::now().timestamp() - 60,
            geo: GeoLocation::default(),
            client_ip: None,
            is_download: false,
        }])
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/metrics/update", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["recorded"], 1);
    assert_eq!(summary["failed"], 0);

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/metrics/{}/view", app.item)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let metric = body_json(response).await;
    assert_eq!(metric["count"], 1);
    assert_eq!(metric["is_last"], true);

    // No downloads happened, so no download metric exists.
    let response = app
        .router
        .oneshot(get(&format!("/metrics/{}/download", app.item)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scope_resolution_walks_up_the_hierarchy() {
    let app = test_app().await;

    // The item inherits the collection's facet configuration.
    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/scopes/{}/facets", app.item)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let scope = body_json(response).await;
    assert_eq!(scope["facet_set"], "thesisConfiguration");
    assert_eq!(scope["source_node"], app.collection.to_string());

    let response = app
        .router
        .oneshot(get(&format!("/scopes/{}/facets", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn report_honours_time_window_params() {
    let app = test_app().await;
    let now = Utc::now().timestamp();

    app.index
        .record_batch(vec![
            ViewEvent {
                subject_type: SubjectType::Item,
                subject_id: app.item,
                timestamp: now - 3600,
                geo: GeoLocation::default(),
                client_ip: None,
                is_download: false,
            },
            ViewEvent {
                subject_type: SubjectType::Item,
                subject_id: app.item,
                timestamp: now - 10,
                geo: GeoLocation::default(),
                client_ip: None,
                is_download: false,
            },
        ])
        .await
        .unwrap();

    let uri = format!(
        "/statistics/{}_TotalVisits?start_time={}&end_time={}",
        app.item,
        now - 60,
        now
    );
    let response = app.router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["points"][0]["views"], 1);
}
