//! Per-request context handed to handlers and middleware.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use url::form_urlencoded;

use crate::error::{self, Error, ErrorHandler};
use crate::params::Params;

/// An incoming request plus everything the framework learned about it.
///
/// The body is buffered before the handler runs, so [`Context::body`] and
/// [`Context::json`] can be called any number of times.
///
/// Middleware can leave values for later layers with [`Context::set`]:
///
/// ```rust
/// use kese::Context;
///
/// let mut ctx = Context::new(http::Method::GET, "/".parse().unwrap(), Default::default(), Default::default());
/// ctx.set("user_id", 42u64);
/// assert_eq!(ctx.get::<u64>("user_id"), Some(&42));
/// assert_eq!(ctx.get::<String>("user_id"), None);
/// ```
pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: Params,
    remote_addr: Option<SocketAddr>,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    error_handler: ErrorHandler,
}

impl Context {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            params: Params::new(),
            remote_addr: None,
            values: HashMap::new(),
            error_handler: error::default_handler(),
        }
    }

    pub(crate) fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Record the peer the request came from. [`Server`](crate::Server) does
    /// this for every connection.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Route handler errors for this request through `handler` instead of
    /// [`default_error_handler`](crate::default_error_handler).
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = handler;
        self
    }

    pub(crate) fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn params(&self) -> &Params { &self.params }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    /// First value of a query-string parameter, percent-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Like [`Context::query`], but falls back to `default` when the key is
    /// absent. A present-but-empty value (`?q=`) is returned as `""`.
    pub fn query_or(&self, key: &str, default: &str) -> String {
        self.query(key).unwrap_or_else(|| default.to_owned())
    }

    /// Header lookup. Names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a request cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers.get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    // ── Forms ────────────────────────────────────────────────────────────────

    /// First value of a form field, looked up in an urlencoded body first and
    /// the query string second.
    pub fn form_value(&self, key: &str) -> Option<String> {
        self.post_form_value(key).or_else(|| self.query(key))
    }

    /// First value of a form field from the body only.
    ///
    /// Only `POST`, `PUT` and `PATCH` bodies sent as
    /// `application/x-www-form-urlencoded` are read.
    pub fn post_form_value(&self, key: &str) -> Option<String> {
        self.body_form()?
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Every value of a form field, body values before query values.
    pub fn form_values(&self, key: &str) -> Vec<String> {
        let query = self.uri.query().map(|q| form_urlencoded::parse(q.as_bytes()));
        self.body_form().into_iter().flatten()
            .chain(query.into_iter().flatten())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    fn body_form(&self) -> Option<form_urlencoded::Parse<'_>> {
        let has_body = matches!(self.method, Method::POST | Method::PUT | Method::PATCH);
        let urlencoded = self.headers.get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"));
        (has_body && urlencoded).then(|| form_urlencoded::parse(&self.body))
    }

    /// Deserialize the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    // ── Value store ──────────────────────────────────────────────────────────

    /// Store a value for later middleware or the handler. Replaces any
    /// previous value under `key`.
    pub fn set<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// The value under `key`, if one exists and has type `V`.
    pub fn get<V: Any>(&self, key: &str) -> Option<&V> {
        self.values.get(key)?.downcast_ref()
    }

    /// Like [`Context::get`] for values that must be there.
    ///
    /// # Panics
    ///
    /// Panics if `key` is missing or holds a different type.
    pub fn must_get<V: Any>(&self, key: &str) -> &V {
        self.get(key)
            .unwrap_or_else(|| panic!("key {key:?} does not exist in context"))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("params", &self.params)
            .field("values", &self.values.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Param;
    use http::HeaderValue;
    use serde::Deserialize;

    fn ctx(uri: &str) -> Context {
        Context::new(Method::GET, uri.parse().unwrap(), HeaderMap::new(), Bytes::new())
    }

    #[test]
    fn params_come_from_the_router() {
        let c = ctx("/users/42").with_params(Params::from(vec![Param::new("id", "42")]));
        assert_eq!(c.param("id"), Some("42"));
        assert_eq!(c.param("other"), None);
        assert_eq!(c.path(), "/users/42");
    }

    #[test]
    fn query_values_are_decoded() {
        let c = ctx("/search?q=hello%20world&tag=a&tag=b&plus=a+b");
        assert_eq!(c.query("q").as_deref(), Some("hello world"));
        assert_eq!(c.query("tag").as_deref(), Some("a"));
        assert_eq!(c.query("plus").as_deref(), Some("a b"));
        assert_eq!(c.query("missing"), None);
    }

    #[test]
    fn query_or_distinguishes_empty_from_missing() {
        assert_eq!(ctx("/search?q=").query_or("q", "default"), "");
        assert_eq!(ctx("/search").query_or("q", "default"), "default");
        assert_eq!(ctx("/search?q=test").query_or("q", "default"), "test");
    }

    #[test]
    fn headers_and_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert("x-token", HeaderValue::from_static("abc"));
        headers.append(COOKIE, HeaderValue::from_static("session=s1; theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("lang=en"));
        let c = Context::new(Method::GET, "/".parse().unwrap(), headers, Bytes::new());

        assert_eq!(c.header("X-Token"), Some("abc"));
        assert_eq!(c.cookie("session"), Some("s1"));
        assert_eq!(c.cookie("theme"), Some("dark"));
        assert_eq!(c.cookie("lang"), Some("en"));
        assert_eq!(c.cookie("nope"), None);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NewUser {
        name: String,
    }

    #[test]
    fn json_body_can_be_read_twice() {
        let c = Context::new(
            Method::POST,
            "/users".parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(br#"{"name":"alice"}"#),
        );
        let first: NewUser = c.json().unwrap();
        let second: NewUser = c.json().unwrap();
        assert_eq!(first, second);
        assert_eq!(c.body().as_ref(), br#"{"name":"alice"}"#);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let c = Context::new(Method::POST, "/".parse().unwrap(), HeaderMap::new(), Bytes::from_static(b"{"));
        assert!(matches!(c.json::<NewUser>(), Err(Error::Json(_))));
    }

    fn form(method: Method, uri: &str, content_type: &str, body: &'static str) -> Context {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        Context::new(method, uri.parse().unwrap(), headers, Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn form_value_prefers_the_body() {
        let c = form(
            Method::POST,
            "/login?user=query&next=%2Fhome",
            "application/x-www-form-urlencoded; charset=utf-8",
            "user=alice&password=s3cret+word",
        );
        assert_eq!(c.form_value("user").as_deref(), Some("alice"));
        assert_eq!(c.form_value("password").as_deref(), Some("s3cret word"));
        assert_eq!(c.form_value("next").as_deref(), Some("/home"));
        assert_eq!(c.form_value("missing"), None);

        assert_eq!(c.post_form_value("user").as_deref(), Some("alice"));
        assert_eq!(c.post_form_value("next"), None);
    }

    #[test]
    fn form_values_collect_body_then_query() {
        let c = form(Method::PUT, "/tags?tag=c", "application/x-www-form-urlencoded", "tag=a&tag=b&other=x");
        assert_eq!(c.form_values("tag"), ["a", "b", "c"]);
        assert!(c.form_values("missing").is_empty());
    }

    #[test]
    fn only_urlencoded_bodies_are_forms() {
        let json = form(Method::POST, "/?user=query", "application/json", "user=alice");
        assert_eq!(json.form_value("user").as_deref(), Some("query"));
        assert_eq!(json.post_form_value("user"), None);

        let get = form(Method::GET, "/", "application/x-www-form-urlencoded", "user=alice");
        assert_eq!(get.form_value("user"), None);
    }

    #[test]
    fn remote_addr_is_optional() {
        assert_eq!(ctx("/").remote_addr(), None);
        let addr: SocketAddr = "10.0.0.7:5000".parse().unwrap();
        assert_eq!(ctx("/").with_remote_addr(addr).remote_addr(), Some(addr));
    }

    #[test]
    fn value_store_is_typed() {
        let mut c = ctx("/");
        c.set("user", String::from("alice"));
        assert_eq!(c.get::<String>("user").map(String::as_str), Some("alice"));
        assert_eq!(c.must_get::<String>("user"), "alice");
        assert!(c.get::<u32>("user").is_none());
        assert!(c.get::<String>("missing").is_none());

        c.set("user", 7u32);
        assert_eq!(c.get::<u32>("user"), Some(&7));
    }

    #[test]
    #[should_panic(expected = "does not exist in context")]
    fn must_get_panics_on_missing_key() {
        ctx("/").must_get::<String>("missing");
    }
}
