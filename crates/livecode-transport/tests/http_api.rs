use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use livecode_core::{CodeExecutor, ExecutionResult, Language};
use livecode_session::{AccountStore, storage::MemoryStorage};
use livecode_transport::{AppState, ConflictBody, HttpConfig, SessionRecord, router};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Echoes the submitted code back as output.
struct EchoExecutor;

#[async_trait]
impl CodeExecutor for EchoExecutor {
    async fn execute(&self, code: &str, _language: Language) -> ExecutionResult {
        ExecutionResult::succeeded(code, Duration::from_millis(1))
    }
}

fn app() -> Router {
    let state = AppState::new(MemoryStorage::new(), EchoExecutor)
        .with_accounts(AccountStore::with_rounds(10));
    router(state, &HttpConfig::default())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with_auth(app, method, uri, body, None).await
}

async fn send_with_auth(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    for uri in ["/", "/health"] {
        let (status, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "ok", "message": "Live Code Studio Backend Running"})
        );
    }
}

#[tokio::test]
async fn test_get_session_creates_default() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/sessions/test-session-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["language"], "javascript");
    assert!(body["code"].as_str().unwrap().contains("Welcome"));
    assert_eq!(body["connectedUsers"], 0);
    assert_eq!(body["revision"], 0);
}

#[tokio::test]
async fn test_update_session_and_read_back() {
    let app = app();
    send(&app, Method::GET, "/sessions/s2", None).await;

    let new_code = "console.log('Updated');";
    let (status, body) = send(&app, Method::POST, "/sessions/s2", Some(json!({"code": new_code}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], new_code);

    let (_, body) = send(&app, Method::GET, "/sessions/s2", None).await;
    assert_eq!(body["code"], new_code);
    assert_eq!(body["revision"], 1);
}

#[tokio::test]
async fn test_language_switch_resets_to_template() {
    let app = app();
    send(&app, Method::POST, "/sessions/s3", Some(json!({"code": "edited"}))).await;

    let (status, body) =
        send(&app, Method::POST, "/sessions/s3", Some(json!({"language": "python"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["language"], "python");
    assert_eq!(body["code"], Language::Python.default_code());

    // code sent alongside the language wins over the template
    let (_, body) = send(
        &app,
        Method::POST,
        "/sessions/s3",
        Some(json!({"code": "print('Integration Test')", "language": "python"})),
    )
    .await;
    assert_eq!(body["code"], "print('Integration Test')");
}

#[tokio::test]
async fn test_stale_update_conflicts() {
    let app = app();
    send(&app, Method::POST, "/sessions/c", Some(json!({"code": "first"}))).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/sessions/c",
        Some(json!({"code": "second", "baseRevision": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let conflict: ConflictBody = serde_json::from_value(body).unwrap();
    assert_eq!(conflict.current.code, "first");
    assert_eq!(conflict.current.revision, 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/sessions/c",
        Some(json!({"code": "second", "baseRevision": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revision"], 2);
}

#[tokio::test]
async fn test_replayed_op_id_is_acknowledged_once() {
    let app = app();
    let op = "6f1c2c50-5b6b-4bde-9a53-6f0f3f0a2b11";
    let patch = json!({"code": "x", "baseRevision": 0, "opId": op});

    let (status, first) = send(&app, Method::POST, "/sessions/op", Some(patch.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = send(&app, Method::POST, "/sessions/op", Some(patch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(second["lastOpId"], op);
}

#[tokio::test]
async fn test_join_and_leave() {
    let app = app();
    let (_, joined) = send(&app, Method::POST, "/sessions/p/join", None).await;
    assert_eq!(joined["connectedUsers"], 1);
    let (_, left) = send(&app, Method::POST, "/sessions/p/leave", None).await;
    assert_eq!(left["connectedUsers"], 0);
    let (_, floored) = send(&app, Method::POST, "/sessions/p/leave", None).await;
    assert_eq!(floored["connectedUsers"], 0);
}

#[tokio::test]
async fn test_list_and_delete() {
    let app = app();
    send(&app, Method::GET, "/sessions/js", None).await;
    send(&app, Method::POST, "/sessions/py", Some(json!({"language": "python"}))).await;

    let (status, body) = send(&app, Method::GET, "/sessions?language=python", None).await;
    assert_eq!(status, StatusCode::OK);
    let records: Vec<SessionRecord> = serde_json::from_value(body).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "py");

    let (status, _) = send(&app, Method::DELETE, "/sessions/py", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::DELETE, "/sessions/py", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("py"));
}

#[tokio::test]
async fn test_execute() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/execute",
        Some(json!({"code": "print('Hello Test')", "language": "python"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["output"], "print('Hello Test')");
    assert!(body["executionTime"].is_number());
}

#[tokio::test]
async fn test_execute_unsupported_language_is_structured() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/execute",
        Some(json!({"code": "fn main() {}", "language": "rust"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Unsupported language: rust");
}

#[tokio::test]
async fn test_execute_missing_field_is_rejected() {
    let app = app();
    let (status, _) = send(&app, Method::POST, "/execute", Some(json!({"code": "print('fail')"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_signup_login_me_flow() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/signup",
        Some(json!({"email": "test@example.com", "full_name": "Test User", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "test@example.com");

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/login",
        Some(json!({"email": "test@example.com", "password": "password123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["access_token"].as_str().unwrap().to_string();

    let (status, body) = send_with_auth(&app, Method::GET, "/auth/me", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["full_name"], "Test User");

    let (status, _) = send_with_auth(&app, Method::POST, "/auth/logout", None, Some(&token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send_with_auth(&app, Method::GET, "/auth/me", None, Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_failures() {
    let app = app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/auth/login",
        Some(json!({"email": "wrong@example.com", "password": "wrongpassword"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::GET, "/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_with_auth(&app, Method::GET, "/auth/me", None, Some("bogus")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sessions_do_not_require_auth() {
    let app = app();
    let (status, _) = send_with_auth(&app, Method::GET, "/sessions/open", None, Some("bogus")).await;
    assert_eq!(status, StatusCode::OK);
}
