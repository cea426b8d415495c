//! In-memory storage for ceremony challenges
//!
//! Challenges are temporary (5 minute expiry) and don't need database persistence.
//! A challenge is removed on lookup, so it can satisfy at most one verification
//! even when two requests race for the same session.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;

use super::{SessionChallenge, SessionStore};
use crate::error::{SessionError, StoreError};

/// Maximum age for challenge states (5 minutes)
pub const CHALLENGE_EXPIRY_SECS: u64 = 300;

/// Challenge entry with expiration
struct ChallengeEntry {
    challenge: SessionChallenge,
    expires_at: Instant,
}

/// Thread-safe in-memory challenge store keyed by `(purpose, session_id)`
pub struct ChallengeStore {
    challenges: DashMap<(String, String), ChallengeEntry>,
    cookie_name: String,
    ttl: Duration,
}

impl ChallengeStore {
    /// Create a new challenge store reading sessions from `cookie_name`
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self::with_ttl(cookie_name, Duration::from_secs(CHALLENGE_EXPIRY_SECS))
    }

    pub fn with_ttl(cookie_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            challenges: DashMap::new(),
            cookie_name: cookie_name.into(),
            ttl,
        }
    }

    /// Remove expired challenges (called periodically)
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.challenges.retain(|_, entry| entry.expires_at > now);
    }

    /// Get number of pending challenges
    pub fn pending_count(&self) -> usize {
        self.challenges.len()
    }
}

#[async_trait]
impl SessionStore for ChallengeStore {
    fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        session_id_from_headers(headers, &self.cookie_name)
    }

    fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    async fn put_challenge(
        &self,
        purpose: &str,
        session_id: &str,
        challenge: SessionChallenge,
    ) -> Result<(), StoreError> {
        self.challenges.insert(
            (purpose.to_string(), session_id.to_string()),
            ChallengeEntry {
                challenge,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get_challenge(
        &self,
        purpose: &str,
        headers: &HeaderMap,
    ) -> Result<SessionChallenge, SessionError> {
        let session_id = self.session_id(headers).ok_or(SessionError::MissingSession)?;

        let (_, entry) = self
            .challenges
            .remove(&(purpose.to_string(), session_id))
            .ok_or_else(|| SessionError::NoChallenge(purpose.to_string()))?;

        if entry.expires_at > Instant::now() {
            Ok(entry.challenge)
        } else {
            Err(SessionError::Expired(purpose.to_string()))
        }
    }
}

/// Value of cookie `name` in the request's `Cookie` headers
pub fn session_id_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("cookie_name", &self.cookie_name)
            .field("pending", &self.challenges.len())
            .finish()
    }
}
