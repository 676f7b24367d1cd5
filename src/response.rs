//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in your handler and return it. Middleware gets the
//! same value back from [`Next::run`](crate::middleware::Next::run) and may
//! add headers before passing it on.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::Error;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts
///
/// ```rust
/// use kese::Response;
/// use serde_json::json;
///
/// Response::json(&json!({ "id": 1 }));
/// Response::text("hello");
/// Response::created(&json!({ "id": 2 }));
/// Response::not_found("no such user");
/// Response::no_content();
/// ```
///
/// # Builder
///
/// ```rust
/// use kese::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(&serde_json::json!({ "id": 42 }));
///
/// Response::builder().bytes(ContentType::Xml, "<ok/>");
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// `200 OK`, `application/json`.
    ///
    /// A value serde cannot encode (a map with non-string keys, say) is
    /// logged and answered with a bare `500`.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::builder().json(value)
    }

    /// `200 OK`, indented `application/json`.
    pub fn json_pretty<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec_pretty(value) {
            Ok(body) => Self::builder().bytes(ContentType::Json, body),
            Err(e) => serialize_failed(e),
        }
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().bytes(ContentType::Html, body.into())
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// `204 No Content`.
    pub fn no_content() -> Self {
        Self::status(StatusCode::NO_CONTENT)
    }

    /// Redirect to `location`. Only 3xx codes are accepted.
    pub fn redirect(code: StatusCode, location: &str) -> Result<Self, Error> {
        if !code.is_redirection() {
            return Err(Error::InvalidRedirect(code.as_u16()));
        }
        Ok(Self::builder().status(code).header(LOCATION.as_str(), location).no_body())
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: StatusCode::OK, headers: HeaderMap::new() }
    }

    // ── JSON status helpers ──────────────────────────────────────────────────

    /// `200 OK` with `data` as JSON.
    pub fn success<T: Serialize + ?Sized>(data: &T) -> Self {
        Self::json(data)
    }

    /// `201 Created` with `resource` as JSON.
    pub fn created<T: Serialize + ?Sized>(resource: &T) -> Self {
        Self::builder().status(StatusCode::CREATED).json(resource)
    }

    pub fn bad_request(message: &str) -> Self {
        error_body(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: &str) -> Self {
        error_body(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: &str) -> Self {
        error_body(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: &str) -> Self {
        error_body(StatusCode::NOT_FOUND, message)
    }

    pub fn internal_error(message: &str) -> Self {
        error_body(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Insert or replace a header. Invalid names or values are logged and
    /// skipped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        insert_header(&mut self.headers, name, value);
    }

    /// Replace the body, keeping status and headers. Used by middleware that
    /// rewrites what the handler produced.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    Response::builder().status(status).json(&json!({ "error": message }))
}

fn serialize_failed(e: serde_json::Error) -> Response {
    error!("response serialization failed: {e}");
    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!(name, value, "invalid response header skipped"),
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by a
/// typed body method, so you always know what you're sending.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.headers, name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => self.bytes(ContentType::Json, body),
            Err(e) => serialize_failed(e),
        }
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into())
    }

    /// Terminate with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(mut self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response { status: self.status, headers: self.headers, body: body.into() }
    }

    /// Terminate with a body whose `content-type`, if any, was set with
    /// [`header`](Self::header).
    pub fn body(self, body: impl Into<Bytes>) -> Response {
        Response { status: self.status, headers: self.headers, body: body.into() }
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new() }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
///
/// ```rust
/// use kese::{IntoResponse, Response};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct User { id: u64, name: String }
///
/// impl IntoResponse for User {
///     fn into_response(self) -> Response {
///         Response::json(&self)
///     }
/// }
/// ```
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly from a handler: `StatusCode::NO_CONTENT`.
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// `(status, body)` overrides the status of any other response.
impl<R: IntoResponse> IntoResponse for (StatusCode, R) {
    fn into_response(self) -> Response {
        let mut res = self.1.into_response();
        res.status = self.0;
        res
    }
}
