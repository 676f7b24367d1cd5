//! Response caching for `GET` routes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderValue, Method};
use parking_lot::Mutex;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Entries a [`MemoryCache`] holds before it evicts.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

const X_CACHE: &str = "x-cache";

/// Storage for cached responses.
pub trait CacheStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Response>;
    fn set(&self, key: &str, response: Response, ttl: Duration);
    fn delete(&self, key: &str);
    fn clear(&self);
}

/// In-process cache with a size cap. When full, expired entries go first,
/// then the least recently read one.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    max_size: usize,
}

struct Entry {
    response: Response,
    expires: Instant,
    last_access: Instant,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_size(DEFAULT_CACHE_SIZE)
    }

    /// A cache holding at most `max_size` responses. Zero means
    /// [`DEFAULT_CACHE_SIZE`].
    pub fn with_size(max_size: usize) -> Self {
        let max_size = if max_size == 0 { DEFAULT_CACHE_SIZE } else { max_size };
        Self { entries: Mutex::new(HashMap::new()), max_size }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Response> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        if now >= entry.expires {
            entries.remove(key);
            return None;
        }
        entry.last_access = now;
        Some(entry.response.clone())
    }

    fn set_at(&self, key: &str, response: Response, ttl: Duration, now: Instant) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) && entries.len() >= self.max_size {
            entries.retain(|_, e| now < e.expires);
            if entries.len() >= self.max_size {
                let oldest = entries.iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        let expires = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(u32::MAX.into()));
        entries.insert(key.to_owned(), Entry { response, expires, last_access: now });
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<Response> {
        self.get_at(key, Instant::now())
    }

    fn set(&self, key: &str, response: Response, ttl: Duration) {
        self.set_at(key, response, ttl, Instant::now());
    }

    fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// Cache settings.
#[derive(Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub store: Arc<dyn CacheStore>,
    /// Cache key for a request. Defaults to `GET:<path>?<query>`.
    pub key: Arc<dyn Fn(&Context) -> String + Send + Sync>,
}

impl CacheConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            store: Arc::new(MemoryCache::new()),
            key: Arc::new(request_key),
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

fn request_key(ctx: &Context) -> String {
    match ctx.uri().query() {
        Some(query) => format!("{}:{}?{query}", ctx.method(), ctx.path()),
        None => format!("{}:{}", ctx.method(), ctx.path()),
    }
}

/// Serves repeated `GET` requests from a cache.
///
/// Only `2xx` responses are stored. Responses carry `X-Cache: HIT` when
/// served from the cache and `X-Cache: MISS` when the handler ran. Other
/// methods pass straight through.
#[derive(Debug, Clone)]
pub struct Cache {
    config: Arc<CacheConfig>,
}

/// Cache `GET` responses for `ttl` in a fresh [`MemoryCache`].
///
/// ```rust
/// use std::time::Duration;
/// use kese::{App, Context};
/// use kese::middleware::cache;
///
/// # async fn catalog(_: Context) -> &'static str { "[]" }
/// let app = App::new()
///     .with(cache(Duration::from_secs(300)))
///     .get("/catalog", catalog);
/// ```
pub fn cache(ttl: Duration) -> Cache {
    cache_with(CacheConfig::new(ttl))
}

pub fn cache_with(config: CacheConfig) -> Cache {
    Cache { config: Arc::new(config) }
}

impl Middleware for Cache {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        if ctx.method() != Method::GET {
            return Box::pin(next.run(ctx));
        }

        let key = (self.config.key)(&ctx);
        if let Some(mut hit) = self.config.store.get(&key) {
            hit.headers_mut().insert(X_CACHE, HeaderValue::from_static("HIT"));
            return Box::pin(async move { hit });
        }

        let config = Arc::clone(&self.config);
        Box::pin(async move {
            let mut res = next.run(ctx).await;
            if res.status_code().is_success() {
                config.store.set(&key, res.clone(), config.ttl);
            }
            res.headers_mut().insert(X_CACHE, HeaderValue::from_static("MISS"));
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ErasedHandler, Handler};
    use crate::middleware::wrap;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(method: Method, uri: &str) -> Context {
        Context::new(method, uri.parse().unwrap(), Default::default(), Default::default())
    }

    /// A handler that answers with how many times it ran.
    fn counting(status: StatusCode) -> (Arc<AtomicUsize>, crate::handler::BoxedHandler) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = move |_ctx: Context| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { (status, format!("call {n}")) }
        };
        (calls, handler.into_boxed_handler())
    }

    #[tokio::test]
    async fn second_get_is_a_hit() {
        let (calls, handler) = counting(StatusCode::OK);
        let chain = wrap(&[Arc::new(cache(Duration::from_secs(60)))], handler);

        let first = chain.call(request(Method::GET, "/items")).await;
        assert_eq!(first.header("x-cache"), Some("MISS"));
        assert_eq!(first.body().as_ref(), b"call 1");

        let second = chain.call(request(Method::GET, "/items")).await;
        assert_eq!(second.header("x-cache"), Some("HIT"));
        assert_eq!(second.body().as_ref(), b"call 1");
        assert_eq!(second.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The query is part of the key.
        let other = chain.call(request(Method::GET, "/items?page=2")).await;
        assert_eq!(other.header("x-cache"), Some("MISS"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_methods_and_failures_are_not_cached() {
        let (calls, handler) = counting(StatusCode::OK);
        let chain = wrap(&[Arc::new(cache(Duration::from_secs(60)))], handler);
        for _ in 0..2 {
            let res = chain.call(request(Method::POST, "/items")).await;
            assert_eq!(res.header("x-cache"), None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let (calls, handler) = counting(StatusCode::INTERNAL_SERVER_ERROR);
        let chain = wrap(&[Arc::new(cache(Duration::from_secs(60)))], handler);
        for _ in 0..2 {
            let res = chain.call(request(Method::GET, "/items")).await;
            assert_eq!(res.header("x-cache"), Some("MISS"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shared_store_can_be_invalidated() {
        let store = Arc::new(MemoryCache::new());
        let config = CacheConfig {
            store: store.clone(),
            ..CacheConfig::new(Duration::from_secs(60))
        };
        let (calls, handler) = counting(StatusCode::OK);
        let chain = wrap(&[Arc::new(cache_with(config))], handler);

        chain.call(request(Method::GET, "/items")).await;
        store.delete("GET:/items");
        let res = chain.call(request(Method::GET, "/items")).await;
        assert_eq!(res.header("x-cache"), Some("MISS"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn entries_expire() {
        let store = MemoryCache::new();
        let t0 = Instant::now();
        store.set_at("k", Response::text("v"), Duration::from_secs(5), t0);
        assert!(store.get_at("k", t0 + Duration::from_secs(4)).is_some());
        assert!(store.get_at("k", t0 + Duration::from_secs(5)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn least_recently_read_is_evicted() {
        let store = MemoryCache::with_size(2);
        let t0 = Instant::now();
        let ttl = Duration::from_secs(60);
        let at = |secs| t0 + Duration::from_secs(secs);

        store.set_at("a", Response::text("a"), ttl, at(0));
        store.set_at("b", Response::text("b"), ttl, at(1));
        assert!(store.get_at("a", at(2)).is_some());
        store.set_at("c", Response::text("c"), ttl, at(3));

        assert_eq!(store.len(), 2);
        assert!(store.get_at("b", at(4)).is_none());
        assert!(store.get_at("a", at(4)).is_some());
        assert!(store.get_at("c", at(4)).is_some());
    }

    #[test]
    fn expired_entries_make_room_first() {
        let store = MemoryCache::with_size(2);
        let t0 = Instant::now();
        store.set_at("short", Response::text("s"), Duration::from_secs(1), t0);
        store.set_at("long", Response::text("l"), Duration::from_secs(60), t0);
        store.get_at("long", t0);

        store.set_at("new", Response::text("n"), Duration::from_secs(60), t0 + Duration::from_secs(2));
        assert!(store.get_at("long", t0 + Duration::from_secs(3)).is_some());
        assert!(store.get_at("new", t0 + Duration::from_secs(3)).is_some());
    }
}
