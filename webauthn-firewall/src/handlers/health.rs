//! Health check handlers
//!
//! Provides the health endpoint for monitoring and orchestration.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::FirewallState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    pub status: &'static str,
    /// Firewall version from Cargo.toml
    pub version: &'static str,
    /// User store backend ("memory" or "postgres")
    pub user_store: &'static str,
    /// Whether the user store answered its health check
    pub user_store_available: bool,
    /// Service name
    pub service: &'static str,
}

/// GET /health - Health check endpoint
///
/// Degraded means step-up protected endpoints will fail closed until the
/// user store recovers.
pub async fn health(State(state): State<FirewallState>) -> Json<HealthResponse> {
    let user_store_available = match state.users.check_health().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "User store health check failed");
            false
        }
    };

    let status = if user_store_available {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        user_store: state.users.backend(),
        user_store_available,
        service: "webauthn-firewall",
    })
}
