//! Transaction-bound assertion verification
//!
//! Stateless between calls: identities live in the user store, pending
//! challenges in the session store, and signature checks in the engine.

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::engine::{AssertionEngine, AuthenticatorResult, EngineError};
use crate::error::{GateError, SessionError};
use crate::extensions::ExpectedExtensions;
use crate::store::{SessionStore, UserQuery, UserStore, AUTHENTICATION_PURPOSE};

impl From<EngineError> for GateError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Extensions(mismatch) => GateError::ExtensionMismatch(mismatch),
            other => GateError::AssertionRejected(other.to_string()),
        }
    }
}

/// Verifies a presented assertion against the expected transaction text
#[derive(Clone)]
pub struct AssertionVerifier {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    engine: Arc<dyn AssertionEngine>,
}

impl AssertionVerifier {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        engine: Arc<dyn AssertionEngine>,
    ) -> Self {
        Self {
            users,
            sessions,
            engine,
        }
    }

    /// Verify `assertion` for the identity matching `query`.
    ///
    /// Succeeds only when the engine accepts the signature over the pending
    /// challenge and the authenticator signed exactly
    /// `{"txAuthSimple": expected_text}`.
    pub async fn verify(
        &self,
        headers: &HeaderMap,
        query: &UserQuery,
        expected_text: &str,
        assertion: &str,
    ) -> Result<AuthenticatorResult, GateError> {
        let identity = self
            .users
            .lookup(query)
            .await?
            .ok_or_else(|| GateError::IdentityLookup(query.to_string()))?;

        let challenge = self
            .sessions
            .get_challenge(AUTHENTICATION_PURPOSE, headers)
            .await?;
        if challenge.user_id != identity.user_id {
            return Err(SessionError::WrongIdentity.into());
        }

        let expected = ExpectedExtensions::tx_auth_simple(expected_text);
        let result = self
            .engine
            .finish_authentication(&identity, challenge, &expected, assertion)
            .await?;

        // TODO: reject on a non-increasing signature counter once the user
        // store can persist credential updates.
        tracing::info!(
            user_id = %identity.user_id,
            credential_id = %result.credential_id,
            counter = result.counter,
            "Step-up assertion verified"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for AssertionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionVerifier")
            .field("users", &self.users.backend())
            .finish()
    }
}
