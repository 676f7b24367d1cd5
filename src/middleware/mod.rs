//! Middleware layer.
//!
//! Middleware sits between the router and a handler and is the right place
//! for cross-cutting concerns: request logging, panic recovery, CORS,
//! request ids, security headers, rate limits, caching, compression,
//! CSRF checks, authentication.
//!
//! A middleware receives the [`Context`] and a [`Next`] handle. It may look
//! at or amend the context, call `next.run(ctx)` to continue the chain, and
//! adjust the response on the way back. Returning without calling `next`
//! ends the chain early:
//!
//! ```rust
//! use kese::{App, Context, Response};
//! use kese::middleware::Next;
//!
//! async fn require_token(ctx: Context, next: Next) -> Response {
//!     if ctx.header("authorization").is_none() {
//!         return Response::unauthorized("missing token");
//!     }
//!     next.run(ctx).await
//! }
//!
//! # async fn secret(_: Context) -> &'static str { "42" }
//! let app = App::new()
//!     .with(require_token)
//!     .get("/secret", secret);
//! ```
//!
//! Middleware is applied when a route is registered: a middleware added with
//! [`App::with`](crate::App::with) wraps every route registered after it, and
//! the first one added is the outermost layer.

mod cache;
mod compress;
mod cors;
mod csrf;
mod logger;
mod ratelimit;
mod recovery;
mod request_id;
mod security;

use std::future::Future;
use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use tracing::warn;

use crate::context::Context;
use crate::handler::{resolve, BoxFuture, BoxedHandler, ErasedHandler, IntoHandlerResult};
use crate::response::Response;

pub use cache::{cache, cache_with, Cache, CacheConfig, CacheStore, MemoryCache, DEFAULT_CACHE_SIZE};
pub use compress::{gzip, gzip_with, Gzip, GzipConfig};
pub use cors::{cors, cors_with, Cors, CorsConfig};
pub use csrf::{csrf, csrf_with, Csrf, CsrfConfig, TokenLookup, CSRF_TOKEN_KEY};
pub use logger::{logger, Logger};
pub use ratelimit::{
    rate_limit, rate_limit_with, KeyFn, MemoryStore, RateDecision, RateLimit, RateLimitConfig,
    RateLimitStore, SkipFn,
};
pub use recovery::{recovery, Recovery};
pub use request_id::{request_id, RequestId, REQUEST_ID_KEY};
pub use security::{secure_headers, secure_headers_with, SecureHeaders, SecurityConfig};

/// A layer around route handlers.
///
/// Implemented for every `Fn(Context, Next) -> impl Future` whose output is
/// either a response or a `Result` (errors go through the app's
/// [`ErrorHandler`](crate::ErrorHandler)). The built-in middleware are
/// plain structs implementing it directly.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response>;
}

impl<F, Fut, R> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        let on_error = ctx.error_handler().clone();
        let fut = self(ctx, next);
        Box::pin(async move { resolve(fut.await.into_handler_result(), &on_error) })
    }
}

/// The rest of the chain below a middleware.
#[derive(Clone)]
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    /// Run the remaining middleware and the handler.
    pub async fn run(self, ctx: Context) -> Response {
        self.inner.call(ctx).await
    }
}

/// A shareable, type-erased middleware.
pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// One middleware bound to the handler chain below it.
struct Layer {
    middleware: BoxedMiddleware,
    next: BoxedHandler,
}

impl ErasedHandler for Layer {
    fn call(&self, ctx: Context) -> BoxFuture<Response> {
        let next = Next { inner: Arc::clone(&self.next) };
        self.middleware.handle(ctx, next)
    }
}

/// Wrap `handler` in `stack`, first element outermost.
pub(crate) fn wrap(stack: &[BoxedMiddleware], handler: BoxedHandler) -> BoxedHandler {
    stack.iter().rev().fold(handler, |next, middleware| {
        let layer: BoxedHandler = Arc::new(Layer { middleware: Arc::clone(middleware), next });
        layer
    })
}

// ── Header helpers for the built-ins ─────────────────────────────────────────

/// A header a middleware adds to every response.
pub(crate) type StaticHeader = (HeaderName, HeaderValue);

/// Validate a configured header once, at construction. Bad values are logged
/// and dropped.
pub(crate) fn static_header(name: &'static str, value: &str) -> Option<StaticHeader> {
    match HeaderValue::try_from(value) {
        Ok(v) => Some((HeaderName::from_static(name), v)),
        Err(_) => {
            warn!(header = name, value, "invalid middleware header value ignored");
            None
        }
    }
}

/// Add `headers` to `res` unless the handler already set them.
pub(crate) fn add_missing(res: &mut Response, headers: &[StaticHeader]) {
    for (name, value) in headers {
        res.headers_mut()
            .entry(name)
            .or_insert_with(|| value.clone());
    }
}
