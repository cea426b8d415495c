//! HTTP forwarding tests against a live local backend.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use webauthn_firewall::{Backend, GateError, HttpBackend};

/// Echoes what it received as JSON, with status 201 and a marker header
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let payload = json!({
        "method": method.as_str(),
        "uri": uri.to_string(),
        "content_type": header_value("content-type"),
        "user": header_value("x-user-id"),
        "keep_alive": header_value("keep-alive"),
        "body": String::from_utf8_lossy(&body),
    });
    (
        StatusCode::CREATED,
        [("x-backend", "echo")],
        Json(payload),
    )
        .into_response()
}

async fn redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/login")]).into_response()
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/login-required", any(redirect))
        .fallback(echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn read_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_request_relayed_verbatim() {
    let base = spawn_backend().await;
    let backend = HttpBackend::new(&base, Duration::from_secs(5)).unwrap();

    let body = "amount=50&assertion=%7B%7D&memo=caf%C3%A9";
    let request = Request::builder()
        .method(Method::POST)
        .uri("/withdraw?src=web")
        .header(header::HOST, "firewall.local")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("x-user-id", "u1")
        .header("keep-alive", "timeout=5")
        .body(Body::from(body))
        .unwrap();

    let response = backend.send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-backend"], "echo");

    let echoed = read_json(response).await;
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/withdraw?src=web");
    assert_eq!(echoed["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(echoed["user"], "u1");
    assert_eq!(echoed["keep_alive"], Value::Null);
    assert_eq!(echoed["body"], body);
}

#[tokio::test]
async fn test_base_path_prefix() {
    let base = spawn_backend().await;
    let backend = HttpBackend::new(&format!("{}/api/", base), Duration::from_secs(5)).unwrap();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/accounts?id=7")
        .body(Body::empty())
        .unwrap();
    let echoed = read_json(backend.send(request).await.unwrap()).await;
    assert_eq!(echoed["uri"], "/api/accounts?id=7");
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let base = spawn_backend().await;
    let backend = HttpBackend::new(&base, Duration::from_secs(5)).unwrap();

    let request = Request::builder()
        .uri("/login-required")
        .body(Body::empty())
        .unwrap();
    let response = backend.send(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login");
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Bind then release a port so nothing listens on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let backend =
        HttpBackend::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    let request = Request::builder()
        .uri("/withdraw")
        .body(Body::empty())
        .unwrap();

    let err = backend.send(request).await.unwrap_err();
    assert!(matches!(err, GateError::Upstream(_)));
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
}
