//! Tests for the REST API module

use crate::api::{create_router, AppState};
use crate::database::TaskStore;
use crate::scheduler::Scheduler;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use shared::api::{endpoints, headers};
use shared::config::SchedulerConfig;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt; // for `oneshot`

/// Builds a router over a fresh store with three provisioned users.
/// Returns the state too so tests can inspect the store and the queue.
async fn create_test_app() -> (axum::Router, AppState, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut store = TaskStore::new(temp_dir.path()).unwrap();
    store.initialize().await.unwrap();

    store.provision_user("alice", 10).await.unwrap();
    store.provision_api_key("alice-key", "alice").await.unwrap();
    store.provision_user("bob", 2).await.unwrap();
    store.provision_api_key("bob-key", "bob").await.unwrap();
    store.provision_user("mallory", 5).await.unwrap();
    store
        .provision_api_key("mallory-key", "mallory")
        .await
        .unwrap();

    let store = Arc::new(Mutex::new(store));
    let scheduler = Scheduler::new();
    let state = AppState::new(SchedulerConfig::default(), Arc::clone(&store), scheduler);
    let router = create_router(state.clone());
    (router, state, temp_dir)
}

fn valid_body() -> serde_json::Value {
    json!({
        "apiMethod": "POST",
        "apiURL": "http://sink/a",
        "startFrom": "2030-01-01 00:00:00",
        "frequency": 3600,
        "apiBody": {"k": "v"}
    })
}

fn create_request(api_key: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(endpoints::TASKS)
        .header("content-type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header(headers::API_KEY, key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn delete_request(api_key: &str, task_id: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(format!("/tasks/{}", task_id))
        .header(headers::API_KEY, api_key)
        .body(Body::empty())
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check_needs_no_auth() {
    let (app, _state, _temp_dir) = create_test_app().await;

    let request = Request::builder()
        .method(Method::GET)
        .uri(endpoints::HEALTH)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_api_key_rejected() {
    let (app, _state, _temp_dir) = create_test_app().await;

    let response = app.oneshot(create_request(None, &valid_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["error"], "API key required");
}

#[tokio::test]
async fn test_unknown_api_key_rejected() {
    let (app, _state, _temp_dir) = create_test_app().await;

    let response = app
        .oneshot(create_request(Some("wrong-key"), &valid_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_json(response).await["error"], "Invalid API key");
}

#[tokio::test]
async fn test_create_task_mints_sequential_ids() {
    let (app, state, _temp_dir) = create_test_app().await;

    let response = app
        .clone()
        .oneshot(create_request(Some("alice-key"), &valid_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["taskId"], "alice_1");

    let response = app
        .oneshot(create_request(Some("alice-key"), &valid_body()))
        .await
        .unwrap();
    assert_eq!(response_json(response).await["taskId"], "alice_2");

    // Both records are durable and both firings are queued.
    let mut store = state.store.lock().await;
    assert!(store.get_task("alice_1").await.unwrap().is_some());
    assert!(store.get_task("alice_2").await.unwrap().is_some());
    drop(store);
    assert_eq!(state.scheduler.queue_len().await, 2);
}

#[tokio::test]
async fn test_create_task_accepts_rfc3339_and_past_start() {
    let (app, state, _temp_dir) = create_test_app().await;

    let mut body = valid_body();
    body["startFrom"] = json!("2020-05-01T08:00:00Z");

    let response = app
        .oneshot(create_request(Some("alice-key"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A past start date is queued as-is; it fires on the next turn.
    let state_guard = state.scheduler.state.lock().await;
    let entry = state_guard.queue.peek_min().unwrap();
    assert_eq!(entry.fire_at, 1_588_320_000); // 2020-05-01T08:00:00Z
}

#[tokio::test]
async fn test_create_task_missing_fields() {
    let (app, state, _temp_dir) = create_test_app().await;

    let response = app
        .oneshot(create_request(
            Some("alice-key"),
            &json!({"apiMethod": "POST", "apiURL": "http://sink/a"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("startFrom"));
    assert!(message.contains("frequency"));
    assert!(message.contains("apiBody"));

    // No side effects: nothing queued, counter untouched.
    assert_eq!(state.scheduler.queue_len().await, 0);
    let mut store = state.store.lock().await;
    let quota = store.get_user_quota("alice").await.unwrap().unwrap();
    assert_eq!(quota.job_count, 0);
}

#[tokio::test]
async fn test_create_task_rejects_bad_input() {
    let (app, _state, _temp_dir) = create_test_app().await;

    let mut body = valid_body();
    body["apiMethod"] = json!("PATCH");
    let response = app
        .clone()
        .oneshot(create_request(Some("alice-key"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut body = valid_body();
    body["startFrom"] = json!("next tuesday");
    let response = app
        .clone()
        .oneshot(create_request(Some("alice-key"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut body = valid_body();
    body["apiURL"] = json!("ftp://sink/a");
    let response = app
        .clone()
        .oneshot(create_request(Some("alice-key"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut body = valid_body();
    body["frequency"] = json!(0);
    let response = app
        .oneshot(create_request(Some("alice-key"), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_quota_enforcement() {
    let (app, state, _temp_dir) = create_test_app().await;

    for expected in ["bob_1", "bob_2"] {
        let response = app
            .clone()
            .oneshot(create_request(Some("bob-key"), &valid_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["taskId"], expected);
    }

    let response = app
        .oneshot(create_request(Some("bob-key"), &valid_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response_json(response).await["error"],
        "Maximum job limit (2) has been reached"
    );

    // The rejected creation wrote nothing.
    let mut store = state.store.lock().await;
    assert!(store.get_task("bob_3").await.unwrap().is_none());
    let quota = store.get_user_quota("bob").await.unwrap().unwrap();
    assert_eq!(quota.job_count, 2);
}

#[tokio::test]
async fn test_delete_requires_ownership() {
    let (app, state, _temp_dir) = create_test_app().await;

    let response = app
        .clone()
        .oneshot(create_request(Some("alice-key"), &valid_body()))
        .await
        .unwrap();
    assert_eq!(response_json(response).await["taskId"], "alice_1");

    let response = app
        .oneshot(delete_request("mallory-key", "alice_1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The task is still present and not tombstoned.
    let mut store = state.store.lock().await;
    assert!(store.get_task("alice_1").await.unwrap().is_some());
    drop(store);
    assert!(!state.scheduler.is_deleted("alice_1").await);
}

#[tokio::test]
async fn test_delete_tombstones_the_task() {
    let (app, state, _temp_dir) = create_test_app().await;

    let response = app
        .clone()
        .oneshot(create_request(Some("alice-key"), &valid_body()))
        .await
        .unwrap();
    assert_eq!(response_json(response).await["taskId"], "alice_1");

    let response = app.oneshot(delete_request("alice-key", "alice_1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response_json(response).await["message"],
        "Task deleted successfully"
    );

    let mut store = state.store.lock().await;
    assert!(store.get_task("alice_1").await.unwrap().is_none());
    drop(store);
    // The queued firing stays in the heap; the tombstone makes the executor
    // skip it.
    assert!(state.scheduler.is_deleted("alice_1").await);
    assert_eq!(state.scheduler.queue_len().await, 1);
}

#[tokio::test]
async fn test_delete_unknown_task_fails_but_still_tombstones() {
    let (app, state, _temp_dir) = create_test_app().await;

    let response = app.oneshot(delete_request("alice-key", "alice_99")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(state.scheduler.is_deleted("alice_99").await);
}
