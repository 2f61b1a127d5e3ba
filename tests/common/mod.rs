//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;

use webhook_gate::http::HttpServer;
use webhook_gate::lifecycle::Shutdown;
use webhook_gate::security::AdmissionGate;
use webhook_gate::GateConfig;

pub const PRIVATE_KEY: &str = include_str!("../fixtures/app-key.pem");

/// Behaviour of the mock upstream API.
#[derive(Default)]
pub struct MockUpstream {
    pub installations: Vec<u64>,
    pub hooks: Vec<&'static str>,
    /// Status returned by the application-authenticated endpoints instead of success.
    pub app_failure: Option<StatusCode>,
    pub installation_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    pub meta_calls: AtomicUsize,
    pub last_per_page: Mutex<Option<String>>,
}

fn installation_token(id: u64) -> String {
    format!("ghs_test_token_{}", id)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn is_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

async fn list_installations(
    State(mock): State<Arc<MockUpstream>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    mock.installation_calls.fetch_add(1, Ordering::SeqCst);
    *mock.last_per_page.lock().unwrap() = query.get("per_page").cloned();

    if !bearer(&headers).is_some_and(is_jwt) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = mock.app_failure {
        return status.into_response();
    }

    let body: Vec<_> = mock
        .installations
        .iter()
        .map(|id| json!({ "id": id, "account": { "login": "octo-org" } }))
        .collect();
    Json(body).into_response()
}

async fn create_token(
    State(mock): State<Arc<MockUpstream>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    mock.token_calls.fetch_add(1, Ordering::SeqCst);
    if !bearer(&headers).is_some_and(is_jwt) || !mock.installations.contains(&id) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({ "token": installation_token(id), "expires_at": "2030-01-01T00:00:00Z" })),
    )
        .into_response()
}

async fn meta(State(mock): State<Arc<MockUpstream>>, headers: HeaderMap) -> Response {
    mock.meta_calls.fetch_add(1, Ordering::SeqCst);
    // Only installation tokens are accepted here
    let expected = mock.installations.first().map(|id| installation_token(*id));
    if bearer(&headers).map(str::to_string) != expected {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(json!({
        "verifiable_password_authentication": false,
        "hooks": mock.hooks,
        "web": ["140.82.112.0/20"],
    }))
    .into_response()
}

/// Start the mock upstream API on an ephemeral port. Returns its base URL.
pub async fn start_mock_upstream(mock: Arc<MockUpstream>) -> String {
    let app = Router::new()
        .route("/api/v3/app/installations", get(list_installations))
        .route("/api/v3/app/installations/{id}/access_tokens", post(create_token))
        .route("/api/v3/meta", get(meta))
        .with_state(mock);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}/api/v3", addr)
}

/// Start the gate-fronted server on an ephemeral port.
pub async fn start_gate_server(
    config: GateConfig,
    gate: Option<Arc<AdmissionGate>>,
    shutdown: &Shutdown,
) -> SocketAddr {
    let app = webhook_gate::http::app_routes()
        .route("/webhooks", axum::routing::post(|| async { "delivered" }));
    let server = HttpServer::new(config, gate, app);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    addr
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
