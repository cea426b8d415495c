//! External stores consumed by the step-up gate
//!
//! Provides:
//! - **Users** ([`UserStore`]): identities, their registered passkeys and
//!   their step-up policy. In-memory (optionally seeded from a JSON file) or
//!   PostgreSQL when `DATABASE_URL` is set.
//! - **Sessions** ([`SessionStore`]): the pending challenge of each
//!   authentication ceremony, keyed by session cookie. Always in memory;
//!   challenges are short-lived and consumed on first lookup.

mod memory;
mod postgres;
mod session;

pub use memory::MemoryUserStore;
pub use postgres::PostgresUserStore;
pub use session::{session_id_from_headers, ChallengeStore, CHALLENGE_EXPIRY_SECS};

use std::fmt;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use webauthn_rs::prelude::Passkey;

use crate::error::{SessionError, StoreError};

/// Purpose under which step-up challenges are stored
pub const AUTHENTICATION_PURPOSE: &str = "authentication";

/// Key used to look up a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    ByUserId(String),
    ByUserName(String),
}

impl UserQuery {
    pub fn by_user_id(user_id: impl Into<String>) -> Self {
        Self::ByUserId(user_id.into())
    }
}

impl fmt::Display for UserQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByUserId(id) => write!(f, "user_id={}", id),
            Self::ByUserName(name) => write!(f, "user_name={}", name),
        }
    }
}

/// A known user and the passkeys registered to them
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
    pub credentials: Vec<Passkey>,
}

/// User record as persisted, including the step-up policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub step_up_enabled: bool,
    #[serde(default)]
    pub credentials: Vec<Passkey>,
}

impl UserRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            user_name: self.user_name.clone(),
            credentials: self.credentials.clone(),
        }
    }

    fn matches(&self, query: &UserQuery) -> bool {
        match query {
            UserQuery::ByUserId(id) => &self.user_id == id,
            UserQuery::ByUserName(name) => &self.user_name == name,
        }
    }
}

/// Pending challenge of one authentication ceremony.
///
/// `state` is the engine's opaque ceremony state; the gate never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionChallenge {
    pub user_id: String,
    pub state: serde_json::Value,
}

/// Read access to users and their step-up policy
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Resolve an identity; `Ok(None)` when the user is unknown
    async fn lookup(&self, query: &UserQuery) -> Result<Option<Identity>, StoreError>;

    /// Whether step-up verification is enabled for the user.
    ///
    /// Unknown users report `false`.
    async fn is_step_up_enabled(&self, query: &UserQuery) -> Result<bool, StoreError>;

    /// Check backend health (always Ok for memory backends)
    async fn check_health(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;
}

/// Storage of pending ceremony challenges keyed by session
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Session identifier carried by the request, if any
    fn session_id(&self, headers: &HeaderMap) -> Option<String>;

    /// Name of the session cookie
    fn cookie_name(&self) -> &str;

    /// Store the challenge for `purpose` in `session_id`, replacing any pending one
    async fn put_challenge(
        &self,
        purpose: &str,
        session_id: &str,
        challenge: SessionChallenge,
    ) -> Result<(), StoreError>;

    /// Retrieve and consume the challenge for `purpose` in the request's session
    async fn get_challenge(
        &self,
        purpose: &str,
        headers: &HeaderMap,
    ) -> Result<SessionChallenge, SessionError>;
}
