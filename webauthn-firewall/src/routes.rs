//! Router configuration module
//!
//! Configures the step-up protected routes, the ceremony and health
//! endpoints, the transparent proxy fallback and the middleware layers.

use std::{collections::HashSet, sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post, MethodFilter, MethodRouter},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::binding::TransactionBinder;
use crate::config::{Config, ConfigError, ProtectedRoute};
use crate::cors;
use crate::handlers::{begin_assertion, health, proxy_handler, secure_handler};
use crate::state::FirewallState;

pub const HEALTH_PATH: &str = "/health";
pub const BEGIN_ASSERTION_PATH: &str = "/webauthn/assertion/begin";

/// Methods of `route` in configured order, without duplicates or `OPTIONS`
fn route_methods(route: &ProtectedRoute) -> Result<Vec<Method>, ConfigError> {
    let mut methods: Vec<Method> = Vec::new();
    for method in route.parsed_methods()? {
        if method != Method::OPTIONS && !methods.contains(&method) {
            methods.push(method);
        }
    }
    if methods.is_empty() {
        return Err(ConfigError::InvalidRoutes(format!(
            "route '{}' has no methods to protect",
            route.path
        )));
    }
    Ok(methods)
}

fn validate_path(path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::InvalidRoutes(format!(
            "path '{}' must start with '/'",
            path
        )));
    }
    // Legacy `:param` / `*rest` captures are rejected by the router at build time
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(ConfigError::InvalidRoutes(format!(
            "path '{}' must use '{{param}}' captures",
            path
        )));
    }
    Ok(())
}

/// Method router enforcing step-up on `route` and answering its preflight
fn protected_method_router(
    route: &ProtectedRoute,
) -> Result<MethodRouter<FirewallState>, ConfigError> {
    let binder: Arc<dyn TransactionBinder> = Arc::new(route.binder()?);
    let methods = route_methods(route)?;
    let allow_methods = HeaderValue::from_str(&cors::allow_methods_value(&methods))
        .map_err(|e| ConfigError::InvalidRoutes(e.to_string()))?;

    let mut router = MethodRouter::new();
    for method in methods {
        let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
            ConfigError::InvalidMethod {
                path: route.path.clone(),
                method: method.to_string(),
            }
        })?;
        let binder = binder.clone();
        router = router.on(
            filter,
            move |State(state): State<FirewallState>, request: Request| {
                let binder = binder.clone();
                async move { secure_handler(state, binder, request).await }
            },
        );
    }

    Ok(router.options(move |State(state): State<FirewallState>| {
        let allow_methods = allow_methods.clone();
        async move { cors::preflight(&state.frontend_origin, &allow_methods) }
    }))
}

/// Create the firewall router.
///
/// Fails when a protected route is malformed or configured twice; an
/// invalid protection rule never results in an unprotected endpoint.
pub fn create_router(config: &Config, state: FirewallState) -> Result<Router, ConfigError> {
    let mut router = Router::new()
        .route(HEALTH_PATH, get(health))
        .route(BEGIN_ASSERTION_PATH, post(begin_assertion));

    let mut seen: HashSet<&str> = HashSet::from([HEALTH_PATH, BEGIN_ASSERTION_PATH]);
    for route in &config.protected_routes {
        validate_path(&route.path)?;
        if !seen.insert(route.path.as_str()) {
            return Err(ConfigError::DuplicateRoute(route.path.clone()));
        }

        router = router.route(&route.path, protected_method_router(route)?);
        tracing::info!(
            path = %route.path,
            methods = ?route.methods,
            transaction_text = %route.transaction_text,
            "Step-up protection enabled"
        );
    }

    // Request body limit
    let body_limit = RequestBodyLimitLayer::new(config.body_limit_bytes());

    // Request timeout
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    let router = router
        .fallback(proxy_handler)
        .with_state(state)
        .layer(body_limit)
        .layer(timeout);

    // Conditionally apply rate limiting (disabled in tests, enabled in production)
    if config.rate_limit_enabled {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_sec)
            .burst_size(config.rate_limit_burst)
            .finish()
            .ok_or_else(|| {
                ConfigError::RateLimit(format!(
                    "{} req/s with burst {}",
                    config.rate_limit_per_sec, config.rate_limit_burst
                ))
            })?;

        tracing::info!(
            "Rate limiting: {} req/s (burst: {})",
            config.rate_limit_per_sec,
            config.rate_limit_burst
        );

        Ok(router
            .layer(GovernorLayer::new(Arc::new(governor_conf)))
            .layer(TraceLayer::new_for_http()))
    } else {
        tracing::warn!("Rate limiting: DISABLED");
        Ok(router.layer(TraceLayer::new_for_http()))
    }
}
