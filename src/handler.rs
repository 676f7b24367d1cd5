//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in a single
//! `Router<BoxedHandler>`, so each one is hidden behind a trait object
//! (`dyn ErasedHandler`) and stored uniformly.
//!
//! ```text
//! async fn hello(ctx: Context) -> Response { … }   ← user writes this
//!        ↓ app.get("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(ctx)  at request time               ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(ctx).await.into_handler_result() })
//!        ↓  Err(e) → the app's ErrorHandler → Response
//! ```
//!
//! Errors are turned into responses right where the handler returns, so
//! every middleware layer above it sees a plain [`Response`]. Middleware
//! wraps a `BoxedHandler` in another `BoxedHandler`; a registered route is
//! one chain of these, built once at registration.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, error};

use crate::context::Context;
use crate::error::{Error, ErrorHandler};
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` lets tokio move the future across worker threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What a handler returns once converted. `Err` goes to the app's
/// [`ErrorHandler`].
pub type HandlerResult = Result<Response, Error>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<Response>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Handler return values ─────────────────────────────────────────────────────

/// Return types a handler may have: anything [`IntoResponse`], or a `Result`
/// whose error converts into [`Error`].
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl<R: IntoResponse> IntoHandlerResult for R {
    fn into_handler_result(self) -> HandlerResult {
        Ok(self.into_response())
    }
}

impl<R, E> IntoHandlerResult for Result<R, E>
where
    R: IntoResponse,
    E: Into<Error>,
{
    fn into_handler_result(self) -> HandlerResult {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

/// Resolve a handler result, routing errors through `on_error`.
pub(crate) fn resolve(result: HandlerResult, on_error: &ErrorHandler) -> Response {
    match result {
        Ok(res) => res,
        Err(err) => {
            if err.status().is_server_error() {
                error!(error = %err, "handler failed");
            } else {
                debug!(error = %err, "handler rejected request");
            }
            on_error(&err)
        }
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied by any `async fn` (or
/// closure returning a future) of the shape:
///
/// ```text
/// async fn name(ctx: Context) -> impl IntoResponse
/// async fn name(ctx: Context) -> Result<impl IntoResponse, impl Into<Error>>
/// ```
///
/// The trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` into the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<Response> {
        let on_error = ctx.error_handler().clone();
        let fut = (self.0)(ctx);
        Box::pin(async move { resolve(fut.await.into_handler_result(), &on_error) })
    }
}
