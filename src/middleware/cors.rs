//! Cross-origin resource sharing headers.

use std::sync::Arc;

use http::Method;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{add_missing, static_header, Middleware, Next, StaticHeader};
use crate::response::Response;

/// CORS settings. Lists are joined with `", "` into the response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// Only the first entry is sent as `Access-Control-Allow-Origin`.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".into()],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allow_headers: ["Origin", "Content-Type", "Authorization"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Adds CORS headers to every response and answers `OPTIONS` preflights
/// with `204 No Content` without running the handler.
///
/// Like all middleware it only wraps registered routes, so a path needs an
/// `OPTIONS` route for its preflight to reach this layer. Any handler will
/// do; it is never called:
///
/// ```rust
/// use kese::{App, Context, StatusCode};
/// use kese::middleware::cors;
///
/// # async fn list(_: Context) -> &'static str { "[]" }
/// let app = App::new()
///     .with(cors())
///     .get("/items", list)
///     .options("/items", |_ctx: Context| async { StatusCode::NO_CONTENT });
/// ```
#[derive(Debug, Clone)]
pub struct Cors {
    headers: Arc<[StaticHeader]>,
}

/// CORS with the permissive defaults: any origin, the common verbs, and the
/// `Origin`, `Content-Type` and `Authorization` request headers.
pub fn cors() -> Cors {
    cors_with(CorsConfig::default())
}

pub fn cors_with(config: CorsConfig) -> Cors {
    let headers = [
        config.allow_origins.first()
            .and_then(|origin| static_header("access-control-allow-origin", origin)),
        non_empty(&config.allow_methods)
            .and_then(|methods| static_header("access-control-allow-methods", &methods)),
        non_empty(&config.allow_headers)
            .and_then(|headers| static_header("access-control-allow-headers", &headers)),
    ];
    Cors { headers: headers.into_iter().flatten().collect() }
}

fn non_empty(list: &[String]) -> Option<String> {
    (!list.is_empty()).then(|| list.join(", "))
}

impl Middleware for Cors {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        let headers = Arc::clone(&self.headers);
        Box::pin(async move {
            let mut res = if ctx.method() == Method::OPTIONS {
                Response::no_content()
            } else {
                next.run(ctx).await
            };
            add_missing(&mut res, &headers);
            res
        })
    }
}
