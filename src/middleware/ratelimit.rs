//! Per-client rate limiting.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Buckets untouched for this long after refilling are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The outcome of one request against a client's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left right now, after this one.
    pub remaining: u32,
    /// When a refused client may try again. Zero when allowed.
    pub retry_after: Duration,
}

/// Storage for rate limit state. Implement it to share limits between
/// processes; [`MemoryStore`] keeps them in this one.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Spend one request for `key`, allowing `limit` requests per `window`.
    fn hit(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision, Error>;

    /// Forget everything about `key`.
    fn reset(&self, key: &str) -> Result<(), Error>;
}

/// In-process token buckets.
///
/// Each key holds up to `limit` tokens and regains them at `limit / window`
/// per second, so a client may burst to the limit and is then held to the
/// average rate.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Buckets>,
}

#[derive(Default)]
struct Buckets {
    map: HashMap<String, Bucket>,
    swept: Option<Instant>,
}

struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hit_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> RateDecision {
        let capacity = f64::from(limit);
        let per_sec = if window.is_zero() { f64::INFINITY } else { capacity / window.as_secs_f64() };

        let mut inner = self.inner.lock();
        inner.sweep(now, capacity, per_sec);

        let bucket = inner.map
            .entry(key.to_owned())
            .or_insert(Bucket { tokens: capacity, updated: now });
        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * per_sec).min(capacity);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision {
                allowed: true,
                remaining: bucket.tokens as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let wait = (1.0 - bucket.tokens) / per_sec;
            RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: Duration::try_from_secs_f64(wait).unwrap_or(window),
            }
        }
    }
}

impl Buckets {
    /// Drop buckets that have refilled, at most once per [`SWEEP_INTERVAL`].
    fn sweep(&mut self, now: Instant, capacity: f64, per_sec: f64) {
        let due = self.swept
            .is_none_or(|last| now.saturating_duration_since(last) >= SWEEP_INTERVAL);
        if !due {
            return;
        }
        self.swept = Some(now);
        self.map.retain(|_, b| {
            let elapsed = now.saturating_duration_since(b.updated).as_secs_f64();
            b.tokens + elapsed * per_sec < capacity
        });
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision, Error> {
        Ok(self.hit_at(key, limit, window, Instant::now()))
    }

    fn reset(&self, key: &str) -> Result<(), Error> {
        self.inner.lock().map.remove(key);
        Ok(())
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").field("keys", &self.len()).finish()
    }
}

/// Derives the client key from a request.
pub type KeyFn = Arc<dyn Fn(&Context) -> String + Send + Sync>;

/// Decides per request whether limiting applies. `true` skips it.
pub type SkipFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Rate limit settings.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window: Duration,
    pub key: KeyFn,
    pub skip: Option<SkipFn>,
    pub store: Arc<dyn RateLimitStore>,
    /// Error text of the `429` body.
    pub message: String,
}

impl RateLimitConfig {
    /// `limit` requests per `window` for each client address, kept in a
    /// fresh [`MemoryStore`].
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            key: Arc::new(client_key),
            skip: None,
            store: Arc::new(MemoryStore::new()),
            message: "rate limit exceeded".to_owned(),
        }
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// `X-Forwarded-For` when a proxy set it, else the peer IP.
fn client_key(ctx: &Context) -> String {
    if let Some(forwarded) = ctx.header("x-forwarded-for").filter(|v| !v.is_empty()) {
        return forwarded.to_owned();
    }
    ctx.remote_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

/// Limits each client to a request budget.
///
/// Every limited response carries `X-RateLimit-Limit` and
/// `X-RateLimit-Remaining`. A client over budget gets
/// `429 Too Many Requests` with `Retry-After` in seconds and the handler does
/// not run. A failing store lets the request through.
#[derive(Debug, Clone)]
pub struct RateLimit {
    config: Arc<RateLimitConfig>,
}

/// `limit` requests per `window` per client.
///
/// ```rust
/// use std::time::Duration;
/// use kese::App;
/// use kese::middleware::rate_limit;
///
/// let app = App::new().with(rate_limit(100, Duration::from_secs(60)));
/// ```
pub fn rate_limit(limit: u32, window: Duration) -> RateLimit {
    rate_limit_with(RateLimitConfig::new(limit, window))
}

pub fn rate_limit_with(config: RateLimitConfig) -> RateLimit {
    RateLimit { config: Arc::new(config) }
}

impl Middleware for RateLimit {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        let config = &self.config;
        if config.skip.as_ref().is_some_and(|skip| skip(&ctx)) {
            return Box::pin(next.run(ctx));
        }

        let key = (config.key)(&ctx);
        let decision = match config.store.hit(&key, config.limit, config.window) {
            Ok(decision) => decision,
            Err(e) => {
                error!(key, "rate limit store failed, request allowed: {e}");
                return Box::pin(next.run(ctx));
            }
        };

        let limit = config.limit;
        if !decision.allowed {
            warn!(key, "rate limit exceeded");
            let retry = decision.retry_after.as_secs_f64().ceil().max(1.0) as u64;
            let mut res = Response::builder()
                .status(StatusCode::TOO_MANY_REQUESTS)
                .header("retry-after", &retry.to_string())
                .json(&json!({ "error": config.message }));
            set_budget(&mut res, limit, 0);
            return Box::pin(async move { res });
        }

        Box::pin(async move {
            let mut res = next.run(ctx).await;
            set_budget(&mut res, limit, decision.remaining);
            res
        })
    }
}

fn set_budget(res: &mut Response, limit: u32, remaining: u32) {
    res.set_header("x-ratelimit-limit", &limit.to_string());
    res.set_header("x-ratelimit-remaining", &remaining.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ErasedHandler, Handler};
    use crate::middleware::wrap;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn ok(_ctx: Context) -> &'static str {
        "ok"
    }

    fn from(addr: &str) -> Context {
        let addr: SocketAddr = addr.parse().unwrap();
        Context::new(http::Method::GET, "/".parse().unwrap(), Default::default(), Default::default())
            .with_remote_addr(addr)
    }

    #[test]
    fn bucket_allows_a_burst_then_refills() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(10);
        let t0 = Instant::now();

        let remaining: Vec<_> = (0..3)
            .map(|_| store.hit_at("a", 3, window, t0))
            .map(|d| (d.allowed, d.remaining))
            .collect();
        assert_eq!(remaining, [(true, 2), (true, 1), (true, 0)]);

        let refused = store.hit_at("a", 3, window, t0);
        assert!(!refused.allowed);
        assert!(refused.retry_after > Duration::from_secs(3));
        assert!(refused.retry_after <= Duration::from_secs(4));

        // One token every 10/3 seconds.
        assert!(store.hit_at("a", 3, window, t0 + Duration::from_secs(4)).allowed);
        assert!(!store.hit_at("a", 3, window, t0 + Duration::from_secs(4)).allowed);

        // Other keys have their own budget.
        assert!(store.hit_at("b", 3, window, t0).allowed);
    }

    #[test]
    fn reset_restores_the_budget() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        assert!(store.hit("a", 1, window).unwrap().allowed);
        assert!(!store.hit("a", 1, window).unwrap().allowed);
        store.reset("a").unwrap();
        assert!(store.hit("a", 1, window).unwrap().allowed);
    }

    #[test]
    fn refilled_buckets_are_swept() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(1);
        let t0 = Instant::now();
        store.hit_at("idle", 5, window, t0);
        store.hit_at("busy", 5, window, t0);
        assert_eq!(store.len(), 2);

        let later = t0 + SWEEP_INTERVAL;
        store.hit_at("busy", 5, window, later);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn over_budget_is_429_and_skips_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let handler = (move |_ctx: Context| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { "ok" }
        }).into_boxed_handler();
        let chain = wrap(&[Arc::new(rate_limit(2, Duration::from_secs(60)))], handler);

        let first = chain.call(from("10.0.0.1:1000")).await;
        assert_eq!(first.status_code(), StatusCode::OK);
        assert_eq!(first.header("x-ratelimit-limit"), Some("2"));
        assert_eq!(first.header("x-ratelimit-remaining"), Some("1"));

        let second = chain.call(from("10.0.0.1:1001")).await;
        assert_eq!(second.header("x-ratelimit-remaining"), Some("0"));

        let third = chain.call(from("10.0.0.1:1002")).await;
        assert_eq!(third.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(third.header("x-ratelimit-remaining"), Some("0"));
        assert_eq!(third.header("retry-after"), Some("30"));
        assert_eq!(third.body().as_ref(), br#"{"error":"rate limit exceeded"}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Another client is unaffected.
        let other = chain.call(from("10.0.0.2:1000")).await;
        assert_eq!(other.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_for_names_the_client() {
        let chain = wrap(&[Arc::new(rate_limit(1, Duration::from_secs(60)))], ok.into_boxed_handler());
        let proxied = |client: &'static str| {
            let mut headers = http::HeaderMap::new();
            headers.insert("x-forwarded-for", http::HeaderValue::from_static(client));
            Context::new(http::Method::GET, "/".parse().unwrap(), headers, Default::default())
                .with_remote_addr("10.0.0.1:80".parse().unwrap())
        };

        assert_eq!(chain.call(proxied("203.0.113.1")).await.status_code(), StatusCode::OK);
        assert_eq!(chain.call(proxied("203.0.113.2")).await.status_code(), StatusCode::OK);
        assert_eq!(
            chain.call(proxied("203.0.113.1")).await.status_code(),
            StatusCode::TOO_MANY_REQUESTS,
        );
    }

    #[tokio::test]
    async fn skip_and_custom_message() {
        let config = RateLimitConfig {
            skip: Some(Arc::new(|ctx: &Context| ctx.path() == "/health")),
            message: "slow down".to_owned(),
            ..RateLimitConfig::new(1, Duration::from_secs(60))
        };
        let chain = wrap(&[Arc::new(rate_limit_with(config))], ok.into_boxed_handler());
        let at = |path: &str| {
            Context::new(http::Method::GET, path.parse().unwrap(), Default::default(), Default::default())
        };

        for _ in 0..3 {
            let res = chain.call(at("/health")).await;
            assert_eq!(res.status_code(), StatusCode::OK);
            assert_eq!(res.header("x-ratelimit-limit"), None);
        }
        assert_eq!(chain.call(at("/api")).await.status_code(), StatusCode::OK);
        let res = chain.call(at("/api")).await;
        assert_eq!(res.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.body().as_ref(), br#"{"error":"slow down"}"#);
    }

    struct Broken;

    impl RateLimitStore for Broken {
        fn hit(&self, _key: &str, _limit: u32, _window: Duration) -> Result<RateDecision, Error> {
            Err(Error::other("store offline"))
        }

        fn reset(&self, _key: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_store_lets_requests_through() {
        let config = RateLimitConfig {
            store: Arc::new(Broken),
            ..RateLimitConfig::new(1, Duration::from_secs(60))
        };
        let chain = wrap(&[Arc::new(rate_limit_with(config))], ok.into_boxed_handler());
        for _ in 0..3 {
            let res = chain.call(from("10.0.0.1:1000")).await;
            assert_eq!(res.status_code(), StatusCode::OK);
            assert_eq!(res.header("x-ratelimit-limit"), None);
        }
    }
}
