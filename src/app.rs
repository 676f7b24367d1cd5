//! The application: routes, middleware and request dispatch.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use tracing::debug;

use crate::context::Context;
use crate::error::{self, Error, ErrorHandler};
use crate::handler::{resolve, BoxedHandler, ErasedHandler, Handler};
use crate::middleware::{wrap, BoxedMiddleware, Middleware};
use crate::response::Response;
use crate::router::Router;

/// Request bodies larger than this are answered with `413 Payload Too Large`.
pub const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Verb shortcuts for [`on`](App::on), shared by [`App`] and [`Group`].
macro_rules! verb_helpers {
    ($($name:ident => $method:ident),* $(,)?) => {
        $(
            #[doc = concat!("Register a `", stringify!($method), "` route.")]
            pub fn $name(self, path: &str, handler: impl Handler) -> Self {
                self.on(Method::$method, path, handler)
            }
        )*
    };
}

/// A kese application.
///
/// Routes and middleware are registered by chaining; the finished app is
/// handed to [`Server::serve`](crate::Server::serve), or driven directly with
/// [`App::dispatch`].
///
/// ```rust
/// use kese::{App, Context, Response};
/// use kese::middleware::{logger, recovery};
///
/// async fn show(ctx: Context) -> Response {
///     Response::success(&serde_json::json!({ "id": ctx.param("id") }))
/// }
///
/// let app = App::new()
///     .with(logger())
///     .with(recovery())
///     .group("/api", |api| api.get("/users/:id", show));
/// ```
pub struct App {
    router: Router<BoxedHandler>,
    middleware: Vec<BoxedMiddleware>,
    error_handler: ErrorHandler,
    body_limit: usize,
}

impl App {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            middleware: Vec::new(),
            error_handler: error::default_handler(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Add a middleware. It wraps every route registered after this call;
    /// routes registered earlier are unaffected. The first middleware added
    /// is the outermost layer.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Register `handler` for `method` and `path`, wrapped in the middleware
    /// added so far. Registering the same route again replaces the handler.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        let handler = wrap(&self.middleware, handler.into_boxed_handler());
        self.router.add(method.as_str(), path, handler);
        self
    }

    verb_helpers! {
        get => GET,
        post => POST,
        put => PUT,
        delete => DELETE,
        patch => PATCH,
        options => OPTIONS,
        head => HEAD,
    }

    /// Register a group of routes under `prefix`.
    ///
    /// Group middleware only wraps the group's routes and runs inside the
    /// app middleware registered before the group.
    ///
    /// ```rust
    /// # use kese::{App, Context};
    /// # async fn list(_: Context) -> &'static str { "[]" }
    /// # async fn stats(_: Context) -> &'static str { "{}" }
    /// let app = App::new().group("/api/v1", |v1| {
    ///     v1.get("/users", list)
    ///       .group("/admin", |admin| admin.get("/stats", stats))
    /// });
    /// ```
    pub fn group(mut self, prefix: &str, build: impl FnOnce(Group) -> Group) -> Self {
        let group = build(Group::new(prefix.to_owned(), self.middleware.clone()));
        for (method, path, handler) in group.routes {
            self.router.add(method.as_str(), &path, handler);
        }
        self
    }

    /// Replace the handler that turns errors into responses.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) -> Response + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Cap request bodies at `limit` bytes. [`Server`](crate::Server) sets
    /// this from [`ServerConfig::body_limit`](crate::ServerConfig).
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Route one request and produce its response.
    ///
    /// The body is buffered up to the body limit first. A request with no
    /// matching route, including one whose path exists only under another
    /// method, gets `404 Not Found`.
    pub async fn dispatch<B>(&self, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();

        let body = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                let err = if err.is::<http_body_util::LengthLimitError>() {
                    Error::PayloadTooLarge { limit: self.body_limit }
                } else {
                    Error::Body(err.to_string())
                };
                return resolve(Err(err), &self.error_handler).into_inner();
            }
        };

        let Some(found) = self.router.lookup(parts.method.as_str(), parts.uri.path()) else {
            debug!(method = %parts.method, path = parts.uri.path(), "no route");
            return not_found().into_inner();
        };

        let mut ctx = Context::new(parts.method, parts.uri, parts.headers, body)
            .with_params(found.params)
            .with_error_handler(Arc::clone(&self.error_handler));
        if let Some(addr) = parts.extensions.get::<SocketAddr>() {
            ctx = ctx.with_remote_addr(*addr);
        }

        found.handler.call(ctx).await.into_inner()
    }
}

fn not_found() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .text("404 Not Found")
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("router", &self.router)
            .field("middleware", &self.middleware.len())
            .field("body_limit", &self.body_limit)
            .finish_non_exhaustive()
    }
}

// ── Groups ────────────────────────────────────────────────────────────────────

/// Routes sharing a path prefix and middleware. Built inside
/// [`App::group`].
pub struct Group {
    prefix: String,
    middleware: Vec<BoxedMiddleware>,
    routes: Vec<(Method, String, BoxedHandler)>,
}

impl Group {
    fn new(prefix: String, middleware: Vec<BoxedMiddleware>) -> Self {
        Self { prefix, middleware, routes: Vec::new() }
    }

    /// Add a middleware for the group routes registered after this call.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Register `handler` for `method` at the group prefix plus `path`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        let handler = wrap(&self.middleware, handler.into_boxed_handler());
        self.routes.push((method, format!("{}{path}", self.prefix), handler));
        self
    }

    verb_helpers! {
        get => GET,
        post => POST,
        put => PUT,
        delete => DELETE,
        patch => PATCH,
        options => OPTIONS,
        head => HEAD,
    }

    /// A nested group: prefixes concatenate and the inner group starts with
    /// this group's middleware.
    pub fn group(mut self, prefix: &str, build: impl FnOnce(Group) -> Group) -> Self {
        let inner = build(Group::new(format!("{}{prefix}", self.prefix), self.middleware.clone()));
        self.routes.extend(inner.routes);
        self
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}
