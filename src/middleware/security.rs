//! Security response headers.

use std::sync::Arc;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{add_missing, static_header, Middleware, Next, StaticHeader};
use crate::response::Response;

/// Which security headers to send. An empty string (or `hsts_max_age` of 0)
/// leaves that header out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    pub x_frame_options: String,
    pub content_type_nosniff: String,
    pub xss_protection: String,
    /// `Strict-Transport-Security` max-age in seconds.
    pub hsts_max_age: u64,
    pub hsts_include_subdomains: bool,
    pub content_security_policy: String,
    pub referrer_policy: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            x_frame_options: "DENY".into(),
            content_type_nosniff: "nosniff".into(),
            xss_protection: "1; mode=block".into(),
            hsts_max_age: 31_536_000, // one year
            hsts_include_subdomains: false,
            content_security_policy: String::new(),
            referrer_policy: "strict-origin-when-cross-origin".into(),
        }
    }
}

/// Adds the configured security headers to every response. Headers the
/// handler set itself are left alone.
#[derive(Debug, Clone)]
pub struct SecureHeaders {
    headers: Arc<[StaticHeader]>,
}

/// Security headers with [`SecurityConfig::default`].
pub fn secure_headers() -> SecureHeaders {
    secure_headers_with(SecurityConfig::default())
}

pub fn secure_headers_with(config: SecurityConfig) -> SecureHeaders {
    let hsts = (config.hsts_max_age > 0).then(|| {
        let mut value = format!("max-age={}", config.hsts_max_age);
        if config.hsts_include_subdomains {
            value.push_str("; includeSubDomains");
        }
        value
    });

    let headers = [
        ("x-frame-options", Some(config.x_frame_options)),
        ("x-content-type-options", Some(config.content_type_nosniff)),
        ("x-xss-protection", Some(config.xss_protection)),
        ("strict-transport-security", hsts),
        ("content-security-policy", Some(config.content_security_policy)),
        ("referrer-policy", Some(config.referrer_policy)),
    ];

    SecureHeaders {
        headers: headers.into_iter()
            .filter_map(|(name, value)| {
                value.filter(|v| !v.is_empty())
                    .and_then(|v| static_header(name, &v))
            })
            .collect(),
    }
}

impl Middleware for SecureHeaders {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        let headers = Arc::clone(&self.headers);
        Box::pin(async move {
            let mut res = next.run(ctx).await;
            add_missing(&mut res, &headers);
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ErasedHandler, Handler};
    use crate::middleware::wrap;

    async fn ok(_ctx: Context) -> &'static str {
        "ok"
    }

    async fn run(middleware: SecureHeaders) -> Response {
        let ctx = Context::new(http::Method::GET, "/".parse().unwrap(), Default::default(), Default::default());
        wrap(&[Arc::new(middleware)], ok.into_boxed_handler()).call(ctx).await
    }

    #[tokio::test]
    async fn defaults() {
        let res = run(secure_headers()).await;
        assert_eq!(res.header("x-frame-options"), Some("DENY"));
        assert_eq!(res.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(res.header("x-xss-protection"), Some("1; mode=block"));
        assert_eq!(res.header("strict-transport-security"), Some("max-age=31536000"));
        assert_eq!(res.header("referrer-policy"), Some("strict-origin-when-cross-origin"));
        assert_eq!(res.header("content-security-policy"), None);
    }

    #[tokio::test]
    async fn custom_config() {
        let res = run(secure_headers_with(SecurityConfig {
            x_frame_options: "SAMEORIGIN".into(),
            hsts_max_age: 63_072_000,
            hsts_include_subdomains: true,
            content_security_policy: "default-src 'self'".into(),
            ..SecurityConfig::default()
        })).await;
        assert_eq!(res.header("x-frame-options"), Some("SAMEORIGIN"));
        assert_eq!(res.header("strict-transport-security"), Some("max-age=63072000; includeSubDomains"));
        assert_eq!(res.header("content-security-policy"), Some("default-src 'self'"));
    }

    #[tokio::test]
    async fn disabled_headers_are_omitted() {
        let res = run(secure_headers_with(SecurityConfig {
            hsts_max_age: 0,
            xss_protection: String::new(),
            ..SecurityConfig::default()
        })).await;
        assert_eq!(res.header("strict-transport-security"), None);
        assert_eq!(res.header("x-xss-protection"), None);
        assert_eq!(res.header("x-frame-options"), Some("DENY"));
    }
}
