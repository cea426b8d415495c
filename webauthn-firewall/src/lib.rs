//! WebAuthn Firewall Library - step-up authentication gate for a reverse proxy
//!
//! Selected backend endpoints require a fresh WebAuthn assertion whose signed
//! client data binds the exact operation being authorized (`txAuthSimple`).
//! Requests that pass, and requests to unprotected paths, are forwarded to the
//! backend byte-for-byte.
//!
//! The caller's identity is read from a request header (`x-user-id` by
//! default). The firewall must sit behind a trusted authentication layer
//! that sets this header and overwrites any value sent by the client;
//! otherwise a caller can claim an unknown identity, which has step-up
//! disabled unless `REQUIRE_KNOWN_USERS` is set.
//!
//! This library exposes the firewall components for use in integration tests.
//! The main binary uses these same components.

pub mod binding;
pub mod config;
pub mod context;
pub mod cors;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod forward;
pub mod gate;
pub mod handlers;
pub mod paths;
pub mod routes;
pub mod state;
pub mod store;
pub mod verifier;

pub use binding::{TemplateBinder, TemplateError, TransactionBinder};
pub use config::{Config, ConfigError, ProtectedRoute};
pub use context::{FormFields, RequestContext};
pub use engine::{AssertionEngine, AuthenticatorResult, EngineError, WebauthnEngine};
pub use error::{GateError, SessionError, StoreError};
pub use extensions::{
    ExpectedExtensions, ExtensionMismatch, ExtensionsVerifier, TransactionExtensions,
    TX_AUTH_SIMPLE,
};
pub use forward::{Backend, Forwarder, HttpBackend};
pub use gate::{GateOutcome, StepUpGate, ASSERTION_FIELD};
pub use paths::ProtectedPaths;
pub use routes::create_router;
pub use state::FirewallState;
pub use store::{
    ChallengeStore, Identity, MemoryUserStore, PostgresUserStore, SessionChallenge, SessionStore,
    UserQuery, UserRecord, UserStore,
};
pub use verifier::AssertionVerifier;
