//! Gate error handling module
//!
//! Provides the error taxonomy shared by every pipeline stage, its
//! deterministic HTTP status mapping, and the JSON error response format.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cors;
use crate::extensions::ExtensionMismatch;

/// Errors raised by the session store while looking up a pending challenge
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The request carries no session cookie
    #[error("No session cookie present")]
    MissingSession,

    /// No challenge pending for this session (never issued or already consumed)
    #[error("No pending {0} challenge for this session")]
    NoChallenge(String),

    /// The challenge existed but its lifetime elapsed
    #[error("The {0} challenge for this session has expired")]
    Expired(String),

    /// The challenge was issued to a different identity
    #[error("Challenge was issued for a different user")]
    WrongIdentity,
}

/// Errors raised by the user or session persistence layer
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Gate error type with one variant per failure class of the step-up pipeline
#[derive(Debug, Clone, Error)]
pub enum GateError {
    /// A required request field is absent
    #[error("Missing required field '{0}'")]
    MissingField(String),

    /// The request does not identify a caller
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The identity is unknown to the user store
    #[error("Unknown identity: {0}")]
    IdentityLookup(String),

    /// The pending challenge is missing, consumed or expired
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The signed transaction extensions differ from the expected ones
    #[error(transparent)]
    ExtensionMismatch(#[from] ExtensionMismatch),

    /// The cryptographic engine rejected the assertion
    #[error("Assertion rejected: {0}")]
    AssertionRejected(String),

    /// The transaction text could not be derived
    #[error("Transaction binding failed: {0}")]
    Binding(String),

    /// The request body could not be buffered or parsed
    #[error("Invalid request body: {0}")]
    Body(String),

    /// The user or session store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The backend could not be reached
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The path is an alternate spelling of a protected route
    #[error("Path '{path}' must be requested as '{protected}'")]
    NonCanonicalPath { path: String, protected: String },
}

impl GateError {
    /// Create a missing field error
    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::MissingField(name.into())
    }

    /// Create a binding error
    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding(message.into())
    }

    /// Create an upstream error
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Status used when no explicit status was recorded with the error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField(_)
            | Self::ExtensionMismatch(_)
            | Self::AssertionRejected(_)
            | Self::Binding(_)
            | Self::Body(_)
            | Self::NonCanonicalPath { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) | Self::IdentityLookup(_) | Self::Session(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Whether the failure originates on the server side rather than in client input
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Upstream(_))
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "MISSING_FIELD",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::IdentityLookup(_) => "UNKNOWN_IDENTITY",
            Self::Session(SessionError::Expired(_)) => "CHALLENGE_EXPIRED",
            Self::Session(_) => "SESSION_ERROR",
            Self::ExtensionMismatch(_) => "EXTENSION_MISMATCH",
            Self::AssertionRejected(_) => "ASSERTION_REJECTED",
            Self::Binding(_) => "BINDING_FAILED",
            Self::Body(_) => "INVALID_BODY",
            Self::Store(_) => "STORE_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::NonCanonicalPath { .. } => "NON_CANONICAL_PATH",
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Store(_) => "Credential storage unavailable".to_string(),
            Self::Upstream(_) => "Backend unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// Build the JSON error response for this error.
    ///
    /// The response carries the frontend origin and the credentials flag so
    /// the browser surfaces the message to the calling page.
    pub fn to_response(&self, status: StatusCode, frontend_origin: &HeaderValue) -> Response {
        let code = self.error_code();
        let internal_message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code = code,
                error = %internal_message,
                "Step-up gate server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                code = code,
                error = %internal_message,
                "Step-up gate rejected request"
            );
        }

        let body = serde_json::json!({
            "error": self.client_message(),
            "code": code,
        });

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            frontend_origin.clone(),
        );
        cors::apply_preamble(headers);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::TransactionExtensions;

    #[test]
    fn test_default_status_mapping() {
        assert_eq!(
            GateError::missing_field("assertion").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GateError::Unauthenticated("no header".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GateError::from(SessionError::MissingSession).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GateError::from(StoreError::Query("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GateError::upstream("refused").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_mismatch_message_carries_both_mappings() {
        let err = GateError::from(ExtensionMismatch {
            expected: TransactionExtensions::tx_auth_simple("withdraw $50"),
            received: TransactionExtensions::tx_auth_simple("withdraw $500"),
        });
        let message = err.to_string();
        assert!(message.contains("withdraw $50\""));
        assert!(message.contains("withdraw $500"));
        assert_eq!(err.error_code(), "EXTENSION_MISMATCH");
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let err = GateError::from(StoreError::Connection("password=hunter2".into()));
        assert!(err.is_internal());
        assert!(!err.client_message().contains("hunter2"));
    }

    #[test]
    fn test_response_headers() {
        let origin = HeaderValue::from_static("http://localhost:3000");
        let response =
            GateError::missing_field("assertion").to_response(StatusCode::BAD_REQUEST, &origin);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], origin);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
