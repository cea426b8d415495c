//! Firewall configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use axum::http::{HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binding::{TemplateBinder, TemplateError};

/// Errors detected while turning configuration into a running firewall
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),

    #[error("WebAuthn error: {0}")]
    Webauthn(String),

    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Invalid PROTECTED_ROUTES: {0}")]
    InvalidRoutes(String),

    #[error("Invalid transaction text for route '{path}': {source}")]
    InvalidTemplate {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("Invalid method '{method}' for route '{path}'")]
    InvalidMethod { path: String, method: String },

    #[error("Route '{0}' is configured more than once")]
    DuplicateRoute(String),

    #[error("Invalid header configuration: {0}")]
    InvalidHeader(String),

    #[error("Invalid rate limit configuration: {0}")]
    RateLimit(String),
}

fn default_methods() -> Vec<String> {
    vec!["POST".to_string()]
}

/// One endpoint that requires step-up authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedRoute {
    /// Path as matched by the router, e.g. `/transfer` or `/accounts/{id}/close`
    pub path: String,
    /// Methods the endpoint accepts (default: POST)
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    /// Transaction text template, e.g. `transfer {amount} to {account}`
    pub transaction_text: String,
}

impl ProtectedRoute {
    pub fn new(
        path: impl Into<String>,
        methods: &[&str],
        transaction_text: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            transaction_text: transaction_text.into(),
        }
    }

    /// Parsed methods, upper-cased
    pub fn parsed_methods(&self) -> Result<Vec<Method>, ConfigError> {
        self.methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                    ConfigError::InvalidMethod {
                        path: self.path.clone(),
                        method: m.clone(),
                    }
                })
            })
            .collect()
    }

    /// Binder rendering this route's transaction text
    pub fn binder(&self) -> Result<TemplateBinder, ConfigError> {
        TemplateBinder::parse(&self.transaction_text).map_err(|source| {
            ConfigError::InvalidTemplate {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Parse the `PROTECTED_ROUTES` JSON array
pub fn parse_protected_routes(raw: &str) -> Result<Vec<ProtectedRoute>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::InvalidRoutes(e.to_string()))
}

/// Firewall configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (default: 8081)
    pub port: u16,
    /// Listen host (default: 127.0.0.1)
    pub host: IpAddr,
    /// Base URL of the protected backend (default: http://127.0.0.1:8080)
    pub backend_url: String,
    /// Frontend origin echoed in CORS headers (default: http://localhost:3000)
    pub frontend_address: String,
    /// Header carrying the authenticated user ID (default: x-user-id).
    ///
    /// Trusted as-is: the layer in front of the firewall must authenticate
    /// the caller and overwrite any client-supplied value.
    pub user_id_header: String,
    /// Refuse protected requests from users absent from the user store
    /// instead of forwarding them without step-up (default: false)
    pub require_known_users: bool,
    /// Cookie carrying the WebAuthn session ID (default: webauthn-session)
    pub session_cookie: String,
    /// Buffered request body limit in MB (default: 10)
    pub body_limit_mb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Log every gated and proxied request (default: false)
    pub verbose: bool,
    /// Endpoints requiring step-up authentication
    pub protected_routes: Vec<ProtectedRoute>,
    /// JSON file seeding the in-memory user store
    pub users_file: Option<PathBuf>,
    /// PostgreSQL user store (in-memory when unset)
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 10)
    pub database_max_connections: u32,
    /// WebAuthn Relying Party ID (default: localhost)
    pub rp_id: String,
    /// WebAuthn Relying Party origin (default: http://localhost:3000)
    pub rp_origin: String,
    /// WebAuthn Relying Party name
    pub rp_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            backend_url: "http://127.0.0.1:8080".to_string(),
            frontend_address: "http://localhost:3000".to_string(),
            user_id_header: "x-user-id".to_string(),
            require_known_users: false,
            session_cookie: "webauthn-session".to_string(),
            body_limit_mb: 10,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            verbose: false,
            protected_routes: Vec::new(),
            users_file: None,
            database_url: None,
            database_max_connections: 10,
            rp_id: "localhost".to_string(),
            rp_origin: "http://localhost:3000".to_string(),
            rp_name: "WebAuthn Firewall".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);

        let host = std::env::var("HOST")
            .ok()
            .and_then(|h| h.parse().ok())
            .unwrap_or(defaults.host);

        let body_limit_mb = std::env::var("BODY_LIMIT_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.body_limit_mb);

        let timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        let rate_limit_per_sec = std::env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rate_limit_per_sec);

        let rate_limit_burst = std::env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rate_limit_burst);

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let require_known_users = std::env::var("REQUIRE_KNOWN_USERS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.require_known_users);

        let verbose = std::env::var("VERBOSE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        // Invalid routes must stop startup rather than leave endpoints unprotected
        let protected_routes = match std::env::var("PROTECTED_ROUTES") {
            Ok(raw) if !raw.trim().is_empty() => parse_protected_routes(&raw)?,
            _ => Vec::new(),
        };

        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.database_max_connections);

        Ok(Self {
            port,
            host,
            backend_url: std::env::var("BACKEND_URL").unwrap_or(defaults.backend_url),
            frontend_address: std::env::var("FRONTEND_ADDRESS")
                .unwrap_or(defaults.frontend_address),
            user_id_header: std::env::var("USER_ID_HEADER").unwrap_or(defaults.user_id_header),
            require_known_users,
            session_cookie: std::env::var("SESSION_COOKIE").unwrap_or(defaults.session_cookie),
            body_limit_mb,
            timeout_secs,
            rate_limit_enabled,
            rate_limit_per_sec,
            rate_limit_burst,
            verbose,
            protected_routes,
            users_file: std::env::var("USERS_FILE").ok().map(PathBuf::from),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections,
            rp_id: std::env::var("WEBAUTHN_RP_ID").unwrap_or(defaults.rp_id),
            rp_origin: std::env::var("WEBAUTHN_RP_ORIGIN").unwrap_or(defaults.rp_origin),
            rp_name: std::env::var("WEBAUTHN_RP_NAME").unwrap_or(defaults.rp_name),
        })
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }

    /// Frontend address as a header value
    pub fn frontend_origin(&self) -> Result<HeaderValue, ConfigError> {
        HeaderValue::from_str(&self.frontend_address)
            .map_err(|_| ConfigError::InvalidOrigin(self.frontend_address.clone()))
    }

    /// Identity header as a header name
    pub fn user_id_header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.user_id_header.to_ascii_lowercase().as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(self.user_id_header.clone()))
    }
}
