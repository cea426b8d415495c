//! Shared fixtures for the firewall integration tests.
//!
//! The crypto engine and the backend are fakes; the user and session stores
//! are the in-memory implementations the binary uses without a database.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use webauthn_firewall::{
    create_router, AssertionEngine, AuthenticatorResult, Backend, ChallengeStore, Config,
    EngineError, ExtensionsVerifier, FirewallState, GateError, Identity, MemoryUserStore,
    ProtectedRoute, SessionChallenge, SessionStore, StoreError, TransactionExtensions, UserQuery,
    UserRecord, UserStore,
};

pub const ORIGIN: &str = "http://localhost:3000";
pub const SESSION_COOKIE: &str = "webauthn-session";

// ============================================================================
// Fake crypto engine
// ============================================================================

/// Assertion format understood by [`FakeEngine`]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FakeAssertion {
    challenge: String,
    #[serde(default)]
    client_extensions: serde_json::Map<String, Value>,
    signature_valid: bool,
}

/// Engine accepting JSON assertions of the form
/// `{"challenge": ..., "clientExtensions": {...}, "signatureValid": bool}`.
#[derive(Default)]
pub struct FakeEngine {
    issued: AtomicUsize,
    finish_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn finish_calls(&self) -> usize {
        self.finish_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssertionEngine for FakeEngine {
    async fn begin_authentication(
        &self,
        identity: &Identity,
    ) -> Result<(Value, SessionChallenge), EngineError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let challenge = format!("challenge-{}-{}", identity.user_id, n);
        Ok((
            json!({ "publicKey": { "challenge": challenge } }),
            SessionChallenge {
                user_id: identity.user_id.clone(),
                state: json!({ "challenge": challenge }),
            },
        ))
    }

    async fn finish_authentication(
        &self,
        _identity: &Identity,
        challenge: SessionChallenge,
        extensions: &dyn ExtensionsVerifier,
        raw_assertion: &str,
    ) -> Result<AuthenticatorResult, EngineError> {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);

        let assertion: FakeAssertion = serde_json::from_str(raw_assertion)
            .map_err(|e| EngineError::Malformed(e.to_string()))?;
        if challenge.state["challenge"] != assertion.challenge.as_str() {
            return Err(EngineError::Rejected("challenge mismatch".into()));
        }
        if !assertion.signature_valid {
            return Err(EngineError::Rejected("bad signature".into()));
        }

        extensions.verify(&TransactionExtensions::from(assertion.client_extensions))?;

        Ok(AuthenticatorResult {
            credential_id: "cred-1".into(),
            counter: 1,
            user_verified: true,
            needs_update: false,
        })
    }
}

/// Serialized assertion over `extensions`
pub fn assertion(challenge: &str, extensions: Value, signature_valid: bool) -> String {
    json!({
        "challenge": challenge,
        "clientExtensions": extensions,
        "signatureValid": signature_valid,
    })
    .to_string()
}

/// Serialized assertion signing `{"txAuthSimple": text}`
pub fn tx_assertion(challenge: &str, text: &str) -> String {
    assertion(challenge, json!({ "txAuthSimple": text }), true)
}

// ============================================================================
// Fake stores and backend
// ============================================================================

/// User store whose every call fails
pub struct FailingUserStore;

#[async_trait]
impl UserStore for FailingUserStore {
    async fn lookup(&self, _query: &UserQuery) -> Result<Option<Identity>, StoreError> {
        Err(StoreError::Connection("database is down".into()))
    }

    async fn is_step_up_enabled(&self, _query: &UserQuery) -> Result<bool, StoreError> {
        Err(StoreError::Connection("database is down".into()))
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        Err(StoreError::Connection("database is down".into()))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

/// A request as received by [`RecordingBackend`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Backend recording every request and answering 200 `backend ok`
#[derive(Default)]
pub struct RecordingBackend {
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingBackend {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn send(&self, request: Request) -> Result<Response, GateError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body: body.to_vec(),
        });

        let mut response = Response::new(Body::from("backend ok"));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert("x-backend", "recorded".parse().unwrap());
        Ok(response)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn user(user_id: &str, step_up_enabled: bool) -> UserRecord {
    UserRecord {
        user_id: user_id.to_string(),
        user_name: format!("{}-name", user_id),
        step_up_enabled,
        credentials: Vec::new(),
    }
}

pub fn test_config() -> Config {
    Config {
        protected_routes: vec![
            ProtectedRoute::new("/withdraw", &["POST"], "withdraw ${amount}"),
            ProtectedRoute::new(
                "/transfer",
                &["POST", "PUT"],
                "transfer {amount} to {account}",
            ),
        ],
        ..Config::default()
    }
}

pub struct TestHarness {
    pub app: Router,
    pub users: Arc<MemoryUserStore>,
    pub sessions: Arc<ChallengeStore>,
    pub engine: Arc<FakeEngine>,
    pub backend: Arc<RecordingBackend>,
}

impl TestHarness {
    /// u1 has step-up enabled, u2 has it disabled
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let users = Arc::new(MemoryUserStore::with_users([
            user("u1", true),
            user("u2", false),
        ]));
        let sessions = Arc::new(ChallengeStore::new(SESSION_COOKIE));
        let engine = Arc::new(FakeEngine::default());
        let backend = Arc::new(RecordingBackend::default());

        let state = FirewallState::new(
            &config,
            users.clone(),
            sessions.clone(),
            engine.clone(),
            backend.clone(),
        )
        .unwrap();
        let app = create_router(&config, state).unwrap();

        Self {
            app,
            users,
            sessions,
            engine,
            backend,
        }
    }

    /// Store a pending challenge for `user_id` under `session_id`
    pub async fn seed_challenge(&self, session_id: &str, user_id: &str, challenge: &str) {
        self.sessions
            .put_challenge(
                "authentication",
                session_id,
                SessionChallenge {
                    user_id: user_id.to_string(),
                    state: json!({ "challenge": challenge }),
                },
            )
            .await
            .unwrap();
    }
}

/// Url-encoded form body from `fields`
pub fn form_body(fields: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

/// POST form request carrying the identity header and optional session cookie
pub fn form_request(
    path: &str,
    user_id: Option<&str>,
    session_id: Option<&str>,
    body: String,
) -> Request {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id);
    }
    if let Some(session_id) = session_id {
        builder = builder.header(header::COOKIE, format!("{}={}", SESSION_COOKIE, session_id));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Status, headers and JSON (or Null) body of `response`
pub async fn read_json(response: Response) -> (StatusCode, HeaderMap, Value) {
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, headers, json)
}
