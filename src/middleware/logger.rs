//! Per-request access log.

use std::time::Instant;

use tracing::{info, warn};

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Logs one line per request: method, path, status and latency.
///
/// Server errors are logged at `WARN`, everything else at `INFO`. Install a
/// `tracing` subscriber to see the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

/// Request logging middleware.
pub fn logger() -> Logger {
    Logger
}

impl Middleware for Logger {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        Box::pin(async move {
            let method = ctx.method().clone();
            let path = ctx.path().to_owned();
            let start = Instant::now();

            let res = next.run(ctx).await;

            let status = res.status_code().as_u16();
            let latency = start.elapsed();
            if res.status_code().is_server_error() {
                warn!(%method, %path, status, ?latency, "request failed");
            } else {
                info!(%method, %path, status, ?latency, "request");
            }
            res
        })
    }
}
