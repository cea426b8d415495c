//! Gated and transparent forwarding handlers

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
};

use crate::binding::TransactionBinder;
use crate::context::RequestContext;
use crate::error::GateError;
use crate::gate::GateOutcome;
use crate::state::FirewallState;

/// Step-up protected endpoint.
///
/// Buffers the request, runs the gate with `binder` and forwards the
/// original request only when the gate lets it through.
pub async fn secure_handler(
    state: FirewallState,
    binder: Arc<dyn TransactionBinder>,
    request: Request,
) -> Response {
    let mut ctx =
        RequestContext::buffer(request, state.body_limit, state.frontend_origin.clone()).await;

    match state.gate.check(&mut ctx, binder.as_ref()).await {
        GateOutcome::Verified(result) => {
            tracing::debug!(
                path = %ctx.uri().path(),
                credential_id = %result.credential_id,
                user_verified = result.user_verified,
                "Step-up passed"
            );
        }
        GateOutcome::NotRequired => {}
        GateOutcome::Rejected => return ctx.into_error_response(),
    }

    state.forwarder.forward(ctx).await
}

/// Every path without step-up protection is forwarded unchanged.
///
/// A path that only differs from a protected route by encoding, case,
/// duplicate slashes or dot segments is refused, since the backend may
/// resolve it to the protected endpoint.
pub async fn proxy_handler(State(state): State<FirewallState>, request: Request) -> Response {
    let protected = state
        .protected_paths
        .protected_by(request.uri().path())
        .map(str::to_string);
    let path = request.uri().path().to_string();

    let mut ctx =
        RequestContext::buffer(request, state.body_limit, state.frontend_origin.clone()).await;
    if let Some(protected) = protected {
        ctx.record_error(GateError::NonCanonicalPath { path, protected });
    }
    state.forwarder.forward(ctx).await
}
