//! Cryptographic assertion engine
//!
//! The gate never checks signatures itself. It hands the identity, the
//! pending challenge, an extensions predicate and the raw assertion to an
//! [`AssertionEngine`], which owns challenge generation and signature checks.
//!
//! ## Architecture
//!
//! - `webauthn`: [`WebauthnEngine`], the `webauthn-rs` backed relying party

mod webauthn;

pub use webauthn::{signed_client_extensions, WebauthnEngine};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::extensions::{ExtensionMismatch, ExtensionsVerifier};
use crate::store::{Identity, SessionChallenge};

/// Authenticator metadata reported by a successful verification
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatorResult {
    /// Credential that produced the assertion (base64url)
    pub credential_id: String,
    /// Signature counter reported by the authenticator
    pub counter: u32,
    /// Whether the user was verified (PIN, biometric)
    pub user_verified: bool,
    /// Whether the stored credential should be updated with this result
    pub needs_update: bool,
}

/// Engine failures
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The assertion could not be parsed
    #[error("Malformed assertion: {0}")]
    Malformed(String),

    /// Signature, challenge or origin verification failed
    #[error("Verification failed: {0}")]
    Rejected(String),

    /// The signed extensions failed the caller's predicate
    #[error(transparent)]
    Extensions(#[from] ExtensionMismatch),

    /// The stored ceremony state is unusable
    #[error("Invalid ceremony state: {0}")]
    State(String),
}

/// Challenge generation and assertion verification
#[async_trait]
pub trait AssertionEngine: Send + Sync {
    /// Start an authentication ceremony for `identity`.
    ///
    /// Returns the options to hand to `navigator.credentials.get` and the
    /// challenge to keep in the session store.
    async fn begin_authentication(
        &self,
        identity: &Identity,
    ) -> Result<(serde_json::Value, SessionChallenge), EngineError>;

    /// Verify `raw_assertion` against `challenge`.
    ///
    /// `extensions` is run over the extensions the authenticator signed; its
    /// failure is reported as [`EngineError::Extensions`].
    async fn finish_authentication(
        &self,
        identity: &Identity,
        challenge: SessionChallenge,
        extensions: &dyn ExtensionsVerifier,
        raw_assertion: &str,
    ) -> Result<AuthenticatorResult, EngineError>;
}
