// Not every test binary uses every helper.
#![allow(dead_code)]

//! Shared helpers for HTTP-level integration tests.
//!
//! Builds the application router exactly as `main.rs` does (same middleware
//! stack via `build_app_router`), but with a scripted [`StubRunner`] in
//! place of ffmpeg and a fixed JWT secret so tests can mint tokens.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use mediaforge_api::auth::jwt::{generate_access_token, JwtConfig};
use mediaforge_api::config::{ServerConfig, StorageConfig};
use mediaforge_api::engine::JobLifecycle;
use mediaforge_api::router::build_app_router;
use mediaforge_api::state::AppState;
use mediaforge_core::types::DbId;
use mediaforge_db::models::status::JobStatus;
use mediaforge_db::repositories::JobRepo;
use mediaforge_runner::StubRunner;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Build a test `ServerConfig` with safe defaults and a fixed JWT secret.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        storage: StorageConfig {
            upload_dir: std::env::temp_dir().join("mediaforge-test-uploads"),
            output_dir: std::env::temp_dir().join("mediaforge-test-outputs"),
        },
    }
}

/// Build the full application router with the production middleware stack,
/// backed by the given pool and a scripted runner.
pub fn build_test_app(pool: PgPool, runner: Arc<StubRunner>) -> Router {
    let config = test_config();
    let lifecycle = Arc::new(JobLifecycle::new(
        pool.clone(),
        runner,
        config.storage.clone(),
    ));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        lifecycle,
    };

    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

fn mint_token(user_id: DbId, role: &str) -> String {
    let config = JwtConfig {
        secret: TEST_JWT_SECRET.to_string(),
        access_token_expiry_mins: 15,
    };
    generate_access_token(user_id, role, &config).expect("token generation failed")
}

pub fn user_token(user_id: DbId) -> String {
    mint_token(user_id, "user")
}

pub fn admin_token(user_id: DbId) -> String {
    mint_token(user_id, "admin")
}

pub fn runner_token(user_id: DbId) -> String {
    mint_token(user_id, "runner")
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str, token: &str) -> Response {
    let request = Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get_anonymous(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, token: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn put_json(app: Router, uri: &str, token: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method("PUT")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn delete(app: Router, uri: &str, token: &str) -> Response {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response body is not valid JSON")
}

/// Collect a response body as raw bytes.
pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Assert the standard error envelope `{ "error": ..., "code": ... }`.
pub async fn assert_error(response: Response, status: StatusCode, code: &str) {
    assert_eq!(response.status(), status);
    let json = body_json(response).await;
    assert_eq!(json["code"], code);
    assert!(
        json["error"].is_string(),
        "error message should be a string"
    );
}

// ---------------------------------------------------------------------------
// Dispatch synchronization
// ---------------------------------------------------------------------------

/// Wait until the dispatch task has started a run on the stub runner.
pub async fn wait_for_run(runner: &StubRunner) {
    for _ in 0..200 {
        if runner.has_script() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("dispatch never started a run");
}

/// Poll until the job reaches the expected status.
pub async fn wait_for_status(pool: &PgPool, job_id: DbId, expected: JobStatus) {
    for _ in 0..200 {
        let job = JobRepo::find_by_id(pool, job_id, None)
            .await
            .expect("find_by_id failed");
        if let Some(job) = job {
            if job.status == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never reached {expected:?}");
}
