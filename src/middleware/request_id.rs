//! Request id assignment.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use http::HeaderValue;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Context key under which the id is stored, as a `String`.
pub const REQUEST_ID_KEY: &str = "request_id";

const HEADER: &str = "x-request-id";

/// Tags each request with `<unix-seconds>-<counter>`.
///
/// The id is stored in the context under [`REQUEST_ID_KEY`] and returned in
/// the `X-Request-ID` response header. The counter is shared by every route
/// the middleware wraps and is safe under concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct RequestId {
    counter: Arc<AtomicU64>,
}

/// Request id middleware.
pub fn request_id() -> RequestId {
    RequestId::default()
}

impl RequestId {
    fn next_id(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        format!("{secs}-{count}")
    }
}

impl Middleware for RequestId {
    fn handle(&self, mut ctx: Context, next: Next) -> BoxFuture<Response> {
        let id = self.next_id();
        ctx.set(REQUEST_ID_KEY, id.clone());
        Box::pin(async move {
            let mut res = next.run(ctx).await;
            if let Ok(value) = HeaderValue::try_from(id) {
                res.headers_mut().insert(HEADER, value);
            }
            res
        })
    }
}
