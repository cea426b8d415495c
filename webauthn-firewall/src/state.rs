//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};

use crate::config::{Config, ConfigError};
use crate::engine::AssertionEngine;
use crate::forward::{Backend, Forwarder};
use crate::gate::StepUpGate;
use crate::paths::ProtectedPaths;
use crate::store::{SessionStore, UserStore};
use crate::verifier::AssertionVerifier;

/// Firewall state shared by every handler.
///
/// Stores, engine and backend are injected so tests can substitute fakes.
#[derive(Clone)]
pub struct FirewallState {
    /// User store for identities and step-up policy
    pub users: Arc<dyn UserStore>,
    /// Session store for pending challenges
    pub sessions: Arc<dyn SessionStore>,
    /// Challenge generation and assertion verification
    pub engine: Arc<dyn AssertionEngine>,
    pub gate: StepUpGate,
    pub forwarder: Forwarder,
    /// Origin echoed in CORS headers
    pub frontend_origin: HeaderValue,
    /// Header carrying the authenticated user ID
    pub user_id_header: HeaderName,
    /// Buffered body limit in bytes
    pub body_limit: usize,
    /// Protected routes, for refusing alternate spellings on the proxy path
    pub protected_paths: Arc<ProtectedPaths>,
}

impl FirewallState {
    pub fn new(
        config: &Config,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        engine: Arc<dyn AssertionEngine>,
        backend: Arc<dyn Backend>,
    ) -> Result<Self, ConfigError> {
        let user_id_header = config.user_id_header_name()?;
        let verifier = AssertionVerifier::new(users.clone(), sessions.clone(), engine.clone());
        let gate = StepUpGate::new(users.clone(), verifier, user_id_header.clone())
            .require_known_users(config.require_known_users);

        Ok(Self {
            users,
            sessions,
            engine,
            gate,
            forwarder: Forwarder::new(backend, config.verbose),
            frontend_origin: config.frontend_origin()?,
            user_id_header,
            body_limit: config.body_limit_bytes(),
            protected_paths: Arc::new(ProtectedPaths::new(
                config.protected_routes.iter().map(|route| route.path.as_str()),
            )),
        })
    }
}
