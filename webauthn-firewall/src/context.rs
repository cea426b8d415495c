//! Per-request context for the step-up pipeline
//!
//! A [`RequestContext`] owns one inbound request for its whole lifetime:
//! - the body is buffered once and never drained, so fields can be read
//!   any number of times and the original bytes forwarded afterwards
//! - the first error recorded by any stage wins; later ones are ignored
//! - [`RequestContext::has_any_error`] is the checkpoint every stage calls
//!   before doing observable work

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};

use crate::error::GateError;

/// Text fields parsed from a buffered request body, in order of appearance
#[derive(Debug, Clone, Default)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    /// Parse the fields of `body` according to its `Content-Type`.
    ///
    /// Recognizes url-encoded forms, the text parts of multipart forms and
    /// top-level scalar members of JSON objects. Any other content type
    /// yields no fields.
    pub async fn parse(headers: &HeaderMap, body: &Bytes) -> Result<Self, GateError> {
        let raw_content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let content_type = raw_content_type.to_ascii_lowercase();

        if content_type.starts_with("application/x-www-form-urlencoded") {
            Ok(Self::from_urlencoded(body))
        } else if content_type.starts_with("multipart/form-data") {
            // Boundaries are case-sensitive
            Self::from_multipart(raw_content_type, body).await
        } else if content_type.starts_with("application/json") {
            Self::from_json(body)
        } else {
            Ok(Self::default())
        }
    }

    fn from_urlencoded(body: &[u8]) -> Self {
        Self(url::form_urlencoded::parse(body).into_owned().collect())
    }

    /// The body is already buffered under the configured limit, so the
    /// parser is bounded by its actual length.
    async fn from_multipart(content_type: &str, body: &Bytes) -> Result<Self, GateError> {
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| GateError::Body(format!("Failed to parse multipart: {}", e)))?;
        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(body.len() as u64));
        let mut multipart = multer::Multipart::with_constraints(
            Body::from(body.clone()).into_data_stream(),
            boundary,
            constraints,
        );

        let mut fields = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| GateError::Body(format!("Failed to parse multipart: {}", e)))?
        {
            // File uploads are forwarded untouched but never exposed as fields
            if field.file_name().is_some() {
                continue;
            }
            let name = field.name().unwrap_or("").to_string();
            let value = field.text().await.map_err(|e| {
                GateError::Body(format!("Failed to read field '{}': {}", name, e))
            })?;
            fields.push((name, value));
        }
        Ok(Self(fields))
    }

    fn from_json(body: &[u8]) -> Result<Self, GateError> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)
            .map_err(|e| GateError::Body(format!("Invalid JSON body: {}", e)))?;

        let fields = object
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::String(s) => Some((name, s)),
                serde_json::Value::Number(n) => Some((name, n.to_string())),
                serde_json::Value::Bool(b) => Some((name, b.to_string())),
                _ => None,
            })
            .collect();
        Ok(Self(fields))
    }

    /// First value recorded under `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

struct RecordedError {
    error: GateError,
    status: Option<StatusCode>,
}

/// One inbound request, its buffered body and the first recorded error
pub struct RequestContext {
    parts: Parts,
    body: Bytes,
    fields: Option<FormFields>,
    error: Option<RecordedError>,
    response: Option<Response>,
    responses_written: usize,
    frontend_origin: HeaderValue,
}

impl RequestContext {
    /// Buffer `request` into a new context.
    ///
    /// Never fails: a body that cannot be read (too large, broken stream) is
    /// recorded as the context's first error and surfaces at the next checkpoint.
    pub async fn buffer(request: Request, body_limit: usize, frontend_origin: HeaderValue) -> Self {
        let (parts, body) = request.into_parts();
        let (body, error) = match axum::body::to_bytes(body, body_limit).await {
            Ok(bytes) => (bytes, None),
            Err(e) => (
                Bytes::new(),
                Some(RecordedError {
                    error: GateError::Body(format!("Failed to read request body: {}", e)),
                    status: None,
                }),
            ),
        };

        Self {
            parts,
            body,
            fields: None,
            error,
            response: None,
            responses_written: 0,
            frontend_origin,
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// The body bytes exactly as the client sent them
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn frontend_origin(&self) -> &HeaderValue {
        &self.frontend_origin
    }

    /// Resolve the caller's user ID from `header`.
    ///
    /// A missing or non-UTF-8 header is recorded as [`GateError::Unauthenticated`].
    pub fn user_id(&mut self, header: &HeaderName) -> Result<String, GateError> {
        let user_id = self
            .parts
            .headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        match user_id {
            Some(id) => Ok(id),
            None => {
                let err = GateError::Unauthenticated(format!("missing '{}' header", header));
                self.record_error(err.clone());
                Err(err)
            }
        }
    }

    /// Value of the named request field.
    ///
    /// Absence is recorded as [`GateError::MissingField`] on the context and
    /// also returned, so a handler can attempt several extractions and check
    /// once afterwards.
    pub async fn get(&mut self, name: &str) -> Result<String, GateError> {
        if self.fields.is_none() {
            let fields = match FormFields::parse(&self.parts.headers, &self.body).await {
                Ok(fields) => fields,
                Err(err) => {
                    self.record_error(err);
                    FormFields::default()
                }
            };
            self.fields = Some(fields);
        }

        let value = self
            .fields
            .as_ref()
            .and_then(|fields| fields.get(name))
            .map(str::to_string);

        match value {
            Some(value) => Ok(value),
            None => {
                let err = GateError::missing_field(name);
                self.record_error(err.clone());
                Err(err)
            }
        }
    }

    /// Record `error` unless an error is already recorded
    pub fn record_error(&mut self, error: GateError) {
        self.record(error, None);
    }

    /// Record `error` with the status to surface it with, unless an error is already recorded
    pub fn record_error_with_status(&mut self, error: GateError, status: StatusCode) {
        self.record(error, Some(status));
    }

    fn record(&mut self, error: GateError, status: Option<StatusCode>) {
        if let Some(first) = &self.error {
            tracing::debug!(
                first = %first.error,
                ignored = %error,
                "Error already recorded, ignoring later error"
            );
            return;
        }
        self.error = Some(RecordedError { error, status });
    }

    /// The recorded error, if any
    pub fn error(&self) -> Option<&GateError> {
        self.error.as_ref().map(|recorded| &recorded.error)
    }

    /// Status the recorded error will be surfaced with
    pub fn error_status(&self) -> Option<StatusCode> {
        self.error
            .as_ref()
            .map(|recorded| recorded.status.unwrap_or_else(|| recorded.error.status_code()))
    }

    /// Pipeline checkpoint.
    ///
    /// Returns false and has no effect when nothing is recorded. Otherwise the
    /// error response is written (once, however often this is called) and
    /// true is returned.
    pub fn has_any_error(&mut self) -> bool {
        let Some(recorded) = &self.error else {
            return false;
        };

        if self.response.is_none() && self.responses_written == 0 {
            let status = recorded.status.unwrap_or_else(|| recorded.error.status_code());
            self.response = Some(recorded.error.to_response(status, &self.frontend_origin));
            self.responses_written += 1;
        }
        true
    }

    /// Consume the context and hand back the written error response
    pub fn into_error_response(mut self) -> Response {
        self.has_any_error();
        self.response
            .take()
            .unwrap_or_else(|| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }

    /// Rebuild the request with its original body for the next stage.
    ///
    /// Every field, including those already read through [`RequestContext::get`],
    /// is present byte-for-byte. Can be called any number of times.
    pub fn restore_for_forwarding(&self) -> Request {
        let mut request = Request::new(Body::from(self.body.clone()));
        *request.method_mut() = self.parts.method.clone();
        *request.uri_mut() = self.parts.uri.clone();
        *request.version_mut() = self.parts.version;
        *request.headers_mut() = self.parts.headers.clone();
        request
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("body_len", &self.body.len())
            .field("error", &self.error.as_ref().map(|e| e.error.to_string()))
            .finish()
    }
}
