//! WebAuthn Firewall - step-up authentication reverse proxy
//!
//! Forwards every request to the configured backend. Routes listed in
//! `PROTECTED_ROUTES` additionally require a transaction-bound WebAuthn
//! assertion for users with step-up enabled:
//! - POST /webauthn/assertion/begin - Start a step-up ceremony
//! - GET  /health - Health check
//!
//! Deploy behind an authenticating proxy that overwrites `USER_ID_HEADER`;
//! the firewall trusts that header as-is.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use webauthn_firewall::{
    create_router, ChallengeStore, Config, FirewallState, HttpBackend, MemoryUserStore,
    PostgresUserStore, UserStore, WebauthnEngine,
};

/// Interval between sweeps of expired challenges
const CHALLENGE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("webauthn_firewall=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let users = user_store(&config).await?;
    let sessions = Arc::new(ChallengeStore::new(config.session_cookie.clone()));
    let engine = Arc::new(
        WebauthnEngine::from_settings(&config.rp_id, &config.rp_origin, &config.rp_name)
            .context("Invalid WebAuthn relying party")?,
    );
    let backend = Arc::new(
        HttpBackend::new(
            &config.backend_url,
            Duration::from_secs(config.timeout_secs),
        )
        .context("Invalid backend")?,
    );

    let state = FirewallState::new(&config, users, sessions.clone(), engine, backend)?;
    let app = create_router(&config, state)?;

    // Expired challenges are rejected on lookup; the sweep only reclaims memory
    let cleanup = sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CHALLENGE_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cleanup.cleanup_expired();
            tracing::debug!(pending = cleanup.pending_count(), "Challenge cleanup");
        }
    });

    let listener = TcpListener::bind(config.socket_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.socket_addr()))?;
    tracing::info!(
        backend = %config.backend_url,
        frontend = %config.frontend_address,
        protected_routes = config.protected_routes.len(),
        identity_header = %config.user_id_header,
        require_known_users = config.require_known_users,
        "WebAuthn firewall listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

async fn user_store(config: &Config) -> anyhow::Result<Arc<dyn UserStore>> {
    if let Some(url) = &config.database_url {
        let store = PostgresUserStore::connect(url, config.database_max_connections).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    let store = match &config.users_file {
        Some(path) => MemoryUserStore::from_file(path)?,
        None => {
            tracing::warn!("No DATABASE_URL or USERS_FILE set, every user has step-up disabled");
            MemoryUserStore::new()
        }
    };
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
