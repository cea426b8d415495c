//! Step-up ceremony start

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};

use crate::context::RequestContext;
use crate::cors;
use crate::error::{GateError, StoreError};
use crate::state::FirewallState;
use crate::store::{UserQuery, AUTHENTICATION_PURPOSE};

/// POST /webauthn/assertion/begin
///
/// Starts an authentication ceremony for the calling user and returns the
/// options for `navigator.credentials.get`. The challenge is kept in the
/// session store under the caller's session cookie, which is issued here
/// when the request carries none.
pub async fn begin_assertion(State(state): State<FirewallState>, request: Request) -> Response {
    let mut ctx =
        RequestContext::buffer(request, state.body_limit, state.frontend_origin.clone()).await;
    if ctx.has_any_error() {
        return ctx.into_error_response();
    }

    let Ok(user_id) = ctx.user_id(&state.user_id_header) else {
        return ctx.into_error_response();
    };

    match start_ceremony(&state, ctx.headers(), user_id).await {
        Ok(response) => response,
        Err(err) => {
            ctx.record_error(err);
            ctx.into_error_response()
        }
    }
}

async fn start_ceremony(
    state: &FirewallState,
    headers: &HeaderMap,
    user_id: String,
) -> Result<Response, GateError> {
    let query = UserQuery::by_user_id(user_id);
    let identity = state
        .users
        .lookup(&query)
        .await?
        .ok_or_else(|| GateError::IdentityLookup(query.to_string()))?;

    let (options, challenge) = state.engine.begin_authentication(&identity).await?;

    let existing = state.sessions.session_id(headers);
    let session_id = existing
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    state
        .sessions
        .put_challenge(AUTHENTICATION_PURPOSE, &session_id, challenge)
        .await?;

    tracing::info!(
        user_id = %identity.user_id,
        new_session = existing.is_none(),
        "Step-up authentication started"
    );

    let mut response = Json(options).into_response();
    let response_headers = response.headers_mut();
    cors::apply_preamble(response_headers);
    response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        state.frontend_origin.clone(),
    );
    if existing.is_none() {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            state.sessions.cookie_name(),
            session_id
        );
        let cookie = HeaderValue::from_str(&cookie)
            .map_err(|e| StoreError::Serialization(format!("Invalid session cookie: {}", e)))?;
        response_headers.insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}
