//! REST API tests
//!
//! Routes are exercised with `tower::ServiceExt::oneshot` against an
//! orchestrator backed by the in-memory store and a scripted platform.

mod helpers;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use fleetsync_server::api::{create_router, AppState};
use fleetsync_server::config::Config;
use fleetsync_server::import::{ImportType, StartImportRequest};

use helpers::{usernames, FakePlatform, Harness};

fn app(h: &Harness) -> Router {
    let state = AppState {
        orchestrator: h.orchestrator.clone(),
    };
    create_router(state, &Config::default())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        },
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = Harness::new(FakePlatform::new());
    let (status, body) = send(&app(&h), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_start_import_returns_job_id() {
    let h = Harness::new(FakePlatform::new().with_users(usernames("u", 4)));
    let app = app(&h);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/imports",
        Some(json!({"importType": "users_only", "batchSize": 2, "jobName": "nightly"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    h.orchestrator.wait(id).await.unwrap();

    let (status, job) = send(&app, Method::GET, &format!("/api/v1/imports/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["job_name"], "nightly");
    assert_eq!(job["status"], "completed");
    assert_eq!(job["processed_items"], 4);
    assert_eq!(job["total_chunks"], 2);

    let (status, progress) =
        send(&app, Method::GET, &format!("/api/v1/imports/{id}/progress"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["phase"], "finished");
    assert_eq!(progress["overallProgress"], 1.0);

    let (status, list) = send(&app, Method::GET, "/api/v1/imports?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_request_is_bad_request() {
    let h = Harness::new(FakePlatform::new());
    let (status, body) = send(
        &app(&h),
        Method::POST,
        "/api/v1/imports",
        Some(json!({"importType": "selective", "selectedUsernames": []})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["status"], 400);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("selected username"));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = Harness::new(FakePlatform::new());
    let uri = format!("/api/v1/imports/{}", Uuid::new_v4());
    let (status, body) = send(&app(&h), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);
}

#[tokio::test]
async fn test_operator_actions_on_completed_job_conflict() {
    let h = Harness::new(FakePlatform::new().with_users(usernames("u", 2)));
    let job = h
        .orchestrator
        .create_job(StartImportRequest::new(ImportType::UsersOnly))
        .await
        .unwrap();
    h.orchestrator.execute(job.id).await.unwrap();
    let app = app(&h);

    for action in ["pause", "resume", "abandon", "rollback"] {
        let uri = format!("/api/v1/imports/{}/{action}", job.id);
        let (status, _) = send(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT, "{action}");
    }
}

#[tokio::test]
async fn test_platform_health_and_reset() {
    let h = Harness::new(FakePlatform::new());
    for _ in 0..6 {
        h.monitor
            .record_outcome(false, std::time::Duration::from_millis(10), Some("timeout"));
    }
    let app = app(&h);

    let (status, health) = send(&app, Method::GET, "/api/v1/platform/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "unhealthy");
    assert_eq!(health["isHealthy"], false);
    assert_eq!(health["consecutiveFailures"], 6);

    let (status, health) =
        send(&app, Method::DELETE, "/api/v1/platform/health/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["totalRequests"], 0);
}
