//! Unified error type and the default error-to-response mapping.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use http::StatusCode;
use serde_json::json;

use crate::response::Response;

/// The error type returned by kese's fallible operations and by handlers.
///
/// Handlers return `Result<impl IntoResponse, Error>`; an `Err` is turned
/// into a response by the app's [`ErrorHandler`]. Infrastructure failures
/// (binding, accepting) surface from [`Server`](crate::Server) directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    Addr(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reading request body: {0}")]
    Body(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("invalid redirect status code: {0} (must be 3xx)")]
    InvalidRedirect(u16),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// An error that maps to `status` with `{"error": message}` as the body.
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into() }
    }

    /// Wrap any application error. The default handler answers `500` and
    /// keeps the details out of the response.
    pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(err.into())
    }

    /// The status code [`default_error_handler`] responds with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Json(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Http { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ── ValidationError ───────────────────────────────────────────────────────────

/// Per-field validation failures, answered with `400 Bad Request`.
///
/// ```rust
/// use kese::ValidationError;
///
/// let mut errs = ValidationError::new();
/// errs.add("email", "must contain @");
/// assert!(errs.has_errors());
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {} errors", self.errors.len())
    }
}

impl std::error::Error for ValidationError {}

// ── Error handlers ────────────────────────────────────────────────────────────

/// Turns a handler error into the response sent to the client.
pub type ErrorHandler = Arc<dyn Fn(&Error) -> Response + Send + Sync + 'static>;

static DEFAULT_HANDLER: LazyLock<ErrorHandler> = LazyLock::new(|| -> ErrorHandler { Arc::new(default_error_handler) });

pub(crate) fn default_handler() -> ErrorHandler {
    Arc::clone(&DEFAULT_HANDLER)
}

/// The error handler every [`App`](crate::App) starts with.
///
/// Client errors echo their message; anything that maps to `500` is reported
/// as a bare `Internal Server Error` so internals never reach the client.
pub fn default_error_handler(err: &Error) -> Response {
    let status = err.status();
    let body = match err {
        Error::Validation(v) => json!({ "error": "Validation failed", "fields": v.errors }),
        Error::Http { message, .. } => json!({ "error": message }),
        _ if status == StatusCode::INTERNAL_SERVER_ERROR => json!({ "error": "Internal Server Error" }),
        other => json!({ "error": other.to_string() }),
    };
    Response::builder().status(status).json(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_json(res: &Response) -> serde_json::Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[test]
    fn validation_errors_list_fields() {
        let mut v = ValidationError::new();
        v.add("name", "required");
        v.add("age", "must be positive");
        let res = default_error_handler(&Error::from(v));
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(&res),
            json!({ "error": "Validation failed", "fields": { "age": "must be positive", "name": "required" } }),
        );
    }

    #[test]
    fn http_errors_keep_status_and_message() {
        let res = default_error_handler(&Error::http(StatusCode::CONFLICT, "already exists"));
        assert_eq!(res.status_code(), StatusCode::CONFLICT);
        assert_eq!(body_json(&res), json!({ "error": "already exists" }));
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = Error::other("db password is hunter2");
        let res = default_error_handler(&err);
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&res), json!({ "error": "Internal Server Error" }));
    }

    #[test]
    fn oversized_body_is_413() {
        let res = default_error_handler(&Error::PayloadTooLarge { limit: 8 });
        assert_eq!(res.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(&res), json!({ "error": "request body exceeds 8 bytes" }));
    }

    #[test]
    fn empty_validation_error_reports_nothing() {
        assert!(!ValidationError::new().has_errors());
    }
}
