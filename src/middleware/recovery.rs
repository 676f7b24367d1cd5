//! Panic recovery.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Turns a panic anywhere below it into `500 Internal Server Error`.
///
/// The panic message is logged; the client only sees
/// `{"error":"Internal Server Error"}`. Without this layer a panicking
/// handler aborts its connection task and the client gets no response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

/// Panic recovery middleware. Register it first so it wraps everything else.
pub fn recovery() -> Recovery {
    Recovery
}

impl Middleware for Recovery {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        let method = ctx.method().clone();
        let path = ctx.path().to_owned();
        Box::pin(async move {
            match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
                Ok(res) => res,
                Err(panic) => {
                    error!(%method, %path, panic = panic_message(&*panic), "handler panicked");
                    Response::internal_error("Internal Server Error")
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
