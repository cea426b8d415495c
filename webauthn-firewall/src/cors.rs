//! CORS preamble and preflight responses
//!
//! The browser frontend lives on a different origin and sends the session
//! cookie with every request, so every response allows credentials and
//! echoes exactly the configured frontend origin.

use axum::{
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};

/// Headers a preflighted request may carry
pub const ALLOW_HEADERS: &str = "Origin,Content-Type,Accept,Authorization";

/// Allow the browser to send and expose cookies
pub fn apply_preamble(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
}

/// Comma-separated method list for `Access-Control-Allow-Methods`.
///
/// `OPTIONS` is appended when absent.
pub fn allow_methods_value(methods: &[Method]) -> String {
    let mut names: Vec<&str> = methods.iter().map(Method::as_str).collect();
    if !methods.contains(&Method::OPTIONS) {
        names.push(Method::OPTIONS.as_str());
    }
    names.join(",")
}

/// Answer an `OPTIONS` preflight with 204 and an empty body
pub fn preflight(frontend_origin: &HeaderValue, allow_methods: &HeaderValue) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    apply_preamble(headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, allow_methods.clone());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        frontend_origin.clone(),
    );
    response
}
