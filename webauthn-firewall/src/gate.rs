//! Step-up gate
//!
//! Runs the checks a protected request must pass before it is forwarded:
//! identity resolution, the per-user step-up policy, transaction binding and
//! assertion verification. Each stage records its first error on the
//! [`RequestContext`] and the gate stops at the following checkpoint.

use std::sync::Arc;

use axum::http::{HeaderName, StatusCode};

use crate::binding::TransactionBinder;
use crate::context::RequestContext;
use crate::engine::AuthenticatorResult;
use crate::error::GateError;
use crate::store::{UserQuery, UserStore};
use crate::verifier::AssertionVerifier;

/// Form field carrying the serialized assertion
pub const ASSERTION_FIELD: &str = "assertion";

/// Result of running the gate over one request
#[derive(Debug)]
pub enum GateOutcome {
    /// Step-up is disabled for the caller; no assertion was required
    NotRequired,
    /// The assertion was verified against the bound transaction text
    Verified(AuthenticatorResult),
    /// An error is recorded on the context; the request must not be forwarded
    Rejected,
}

/// Decides per request whether step-up is needed and enforces it
#[derive(Clone)]
pub struct StepUpGate {
    users: Arc<dyn UserStore>,
    verifier: AssertionVerifier,
    user_id_header: HeaderName,
    require_known_users: bool,
}

impl StepUpGate {
    pub fn new(
        users: Arc<dyn UserStore>,
        verifier: AssertionVerifier,
        user_id_header: HeaderName,
    ) -> Self {
        Self {
            users,
            verifier,
            user_id_header,
            require_known_users: false,
        }
    }

    /// Refuse identities absent from the user store instead of treating
    /// them as having step-up disabled.
    pub fn require_known_users(mut self, require: bool) -> Self {
        self.require_known_users = require;
        self
    }

    /// Whether the identity matching `query` must pass step-up.
    ///
    /// Evaluated on every request; the policy may change between requests.
    pub async fn requires_step_up(&self, query: &UserQuery) -> Result<bool, GateError> {
        if self.users.is_step_up_enabled(query).await? {
            return Ok(true);
        }
        if self.require_known_users && self.users.lookup(query).await?.is_none() {
            return Err(GateError::IdentityLookup(query.to_string()));
        }
        Ok(false)
    }

    /// Run every stage over `ctx`.
    ///
    /// On [`GateOutcome::Rejected`] the context holds the error to surface.
    /// The body is never drained, so a forwardable context still carries
    /// every field the client sent.
    pub async fn check(
        &self,
        ctx: &mut RequestContext,
        binder: &dyn TransactionBinder,
    ) -> GateOutcome {
        // Errors from earlier initialization (body buffering) stop here
        if ctx.has_any_error() {
            return GateOutcome::Rejected;
        }

        let Ok(user_id) = ctx.user_id(&self.user_id_header) else {
            return GateOutcome::Rejected;
        };
        let query = UserQuery::by_user_id(user_id);

        match self.requires_step_up(&query).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(user = %query, "Step-up disabled, skipping assertion check");
                return GateOutcome::NotRequired;
            }
            Err(err) => {
                ctx.record_error(err);
                return GateOutcome::Rejected;
            }
        }

        let Ok(assertion) = ctx.get(ASSERTION_FIELD).await else {
            return GateOutcome::Rejected;
        };

        let text = binder.transaction_text(ctx).await;
        if ctx.has_any_error() {
            return GateOutcome::Rejected;
        }
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            ctx.record_error(GateError::binding("no transaction text produced"));
            return GateOutcome::Rejected;
        };

        match self
            .verifier
            .verify(ctx.headers(), &query, &text, &assertion)
            .await
        {
            Ok(result) => GateOutcome::Verified(result),
            Err(err) => {
                if err.is_internal() {
                    ctx.record_error(err);
                } else {
                    ctx.record_error_with_status(err, StatusCode::BAD_REQUEST);
                }
                GateOutcome::Rejected
            }
        }
    }
}

impl std::fmt::Debug for StepUpGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepUpGate")
            .field("user_id_header", &self.user_id_header)
            .field("require_known_users", &self.require_known_users)
            .field("verifier", &self.verifier)
            .finish()
    }
}
