//! Context plugins.
//!
//! A plugin reads something from the incoming request, stores it in the
//! request context under its key, and may echo it onto the response.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{CORRELATION_ID_KEY, REQUEST_ID_KEY};

/// Request id header name.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Correlation id header name.
pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// Error raised by a plugin that refuses the incoming request.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("invalid {header} header value: {value:?}")]
    InvalidId { header: String, value: String },
}

/// A stage that contributes one field to the request context.
pub trait ContextPlugin: Send + Sync + 'static {
    /// Context key the extracted value is stored under.
    fn key(&self) -> &str;

    /// Extract the value for this request. `Ok(None)` stores nothing.
    fn extract(&self, request: &Request<Body>) -> Result<Option<Value>, PluginError>;

    /// Optionally copy the stored value onto the response.
    fn enrich_response(&self, _value: &Value, _headers: &mut HeaderMap) {}
}

/// Identifier plugin backed by a request header.
///
/// Reuses the incoming header value when present, otherwise generates a
/// UUID v4. The value is echoed back on the response under the same header.
#[derive(Debug, Clone)]
pub struct IdPlugin {
    key: &'static str,
    header: HeaderName,
    validate: bool,
    force_new: bool,
}

impl IdPlugin {
    fn new(key: &'static str, header: &'static str) -> Self {
        Self {
            key,
            header: HeaderName::from_static(header),
            validate: true,
            force_new: false,
        }
    }

    /// `X-Request-ID` stored as `request_id`.
    pub fn request_id() -> Self {
        Self::new(REQUEST_ID_KEY, X_REQUEST_ID)
    }

    /// `X-Correlation-ID` stored as `correlation_id`.
    pub fn correlation_id() -> Self {
        Self::new(CORRELATION_ID_KEY, X_CORRELATION_ID)
    }

    /// Reject incoming values that are not UUIDs (default: on).
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Ignore incoming values and always generate a fresh id.
    pub fn force_new(mut self, force_new: bool) -> Self {
        self.force_new = force_new;
        self
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    fn invalid(&self, value: String) -> PluginError {
        PluginError::InvalidId {
            header: self.header.to_string(),
            value,
        }
    }
}

impl ContextPlugin for IdPlugin {
    fn key(&self) -> &str {
        self.key
    }

    fn extract(&self, request: &Request<Body>) -> Result<Option<Value>, PluginError> {
        if !self.force_new {
            if let Some(raw) = request.headers().get(&self.header) {
                let value = raw
                    .to_str()
                    .map_err(|_| self.invalid(String::from_utf8_lossy(raw.as_bytes()).into_owned()))?;
                if self.validate && Uuid::parse_str(value).is_err() {
                    return Err(self.invalid(value.to_string()));
                }
                return Ok(Some(Value::String(value.to_string())));
            }
        }
        Ok(Some(Value::String(Uuid::new_v4().to_string())))
    }

    fn enrich_response(&self, value: &Value, headers: &mut HeaderMap) {
        if let Some(id) = value.as_str() {
            if let Ok(header_value) = HeaderValue::from_str(id) {
                headers.insert(self.header.clone(), header_value);
            }
        }
    }
}

/// Copies a request header verbatim into the context.
#[derive(Debug, Clone)]
pub struct HeaderPlugin {
    key: String,
    header: HeaderName,
}

impl HeaderPlugin {
    pub fn new(key: impl Into<String>, header: HeaderName) -> Self {
        Self {
            key: key.into(),
            header,
        }
    }

    /// `User-Agent` stored as `user_agent`.
    pub fn user_agent() -> Self {
        Self::new("user_agent", axum::http::header::USER_AGENT)
    }
}

impl ContextPlugin for HeaderPlugin {
    fn key(&self) -> &str {
        &self.key
    }

    fn extract(&self, request: &Request<Body>) -> Result<Option<Value>, PluginError> {
        Ok(request
            .headers()
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string())))
    }
}
