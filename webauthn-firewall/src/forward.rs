//! Forwarding to the protected backend
//!
//! The [`Forwarder`] is the only place a request leaves the firewall. It
//! runs the final checkpoint, restores the buffered body and relays the
//! backend's answer.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderName},
    response::Response,
};
use url::Url;

use crate::config::ConfigError;
use crate::context::RequestContext;
use crate::cors;
use crate::error::GateError;

/// Connection-scoped headers that must not cross the proxy
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are hop-by-hop as well
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Transport to the protected backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send `request` and return the backend's response.
    ///
    /// Transport failures map to [`GateError::Upstream`].
    async fn send(&self, request: Request) -> Result<Response, GateError>;
}

/// [`Backend`] reached over HTTP with `reqwest`
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend for `base_url` (scheme, host and optional path prefix)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let parsed =
            Url::parse(base_url).map_err(|e| ConfigError::InvalidBackendUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBackendUrl(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        // Redirects are relayed to the browser, never followed here
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn target(&self, request: &Request) -> String {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.base_url, path_and_query)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send(&self, request: Request) -> Result<Response, GateError> {
        let target = self.target(&request);
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| GateError::upstream(format!("Failed to read forwarded body: {}", e)))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let upstream = self
            .client
            .request(parts.method, &target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| GateError::upstream(format!("{}: {}", target, e)))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| GateError::upstream(format!("Failed to read backend response: {}", e)))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Sends requests that passed every check to the backend
#[derive(Clone)]
pub struct Forwarder {
    backend: Arc<dyn Backend>,
    verbose: bool,
}

impl Forwarder {
    pub fn new(backend: Arc<dyn Backend>, verbose: bool) -> Self {
        Self { backend, verbose }
    }

    /// Forward the request held by `ctx`, or answer with its recorded error.
    ///
    /// The backend is contacted only when the checkpoint finds no error. The
    /// forwarded body is the buffered original.
    pub async fn forward(&self, mut ctx: RequestContext) -> Response {
        if ctx.has_any_error() {
            return ctx.into_error_response();
        }

        if self.verbose {
            tracing::info!("{} {}", ctx.method(), ctx.uri());
        }

        let request = ctx.restore_for_forwarding();
        match self.backend.send(request).await {
            Ok(mut response) => {
                cors::apply_preamble(response.headers_mut());
                response
            }
            Err(err) => {
                ctx.record_error(err);
                ctx.into_error_response()
            }
        }
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("verbose", &self.verbose)
            .finish()
    }
}
