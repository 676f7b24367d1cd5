//! Double-submit cookie CSRF protection.

use std::sync::Arc;

use http::header::SET_COOKIE;
use http::{HeaderValue, Method};
use rand::RngCore;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Context key under which the token is stored, as a `String`.
pub const CSRF_TOKEN_KEY: &str = "csrf_token";

/// Where unsafe requests carry the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// An urlencoded form field (or query parameter).
    Form(String),
    /// A request header.
    Header(String),
}

/// CSRF settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfConfig {
    /// Random bytes per token. The token is their hex encoding.
    pub token_length: usize,
    pub lookup: TokenLookup,
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_http_only: bool,
    /// `SameSite` attribute of the cookie; empty leaves it out.
    pub cookie_same_site: String,
    pub context_key: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_length: 32,
            lookup: TokenLookup::Form("csrf_token".into()),
            cookie_name: "_csrf".into(),
            cookie_path: "/".into(),
            cookie_http_only: true,
            cookie_same_site: "Strict".into(),
            context_key: CSRF_TOKEN_KEY.into(),
        }
    }
}

/// Rejects state-changing requests that cannot prove they came from a page
/// this app served.
///
/// `GET`, `HEAD` and `OPTIONS` requests get a fresh token, stored in the
/// context and sent in a cookie. Every other method must echo the cookie's
/// token in the configured form field or header, or it is answered with
/// `403 Forbidden`.
#[derive(Debug, Clone)]
pub struct Csrf {
    config: Arc<CsrfConfig>,
}

/// CSRF protection reading the token from the `csrf_token` form field.
///
/// ```rust
/// use kese::{App, Context};
/// use kese::middleware::{csrf, CSRF_TOKEN_KEY};
///
/// async fn form(ctx: Context) -> String {
///     let token = ctx.get::<String>(CSRF_TOKEN_KEY).cloned().unwrap_or_default();
///     format!(r#"<input type="hidden" name="csrf_token" value="{token}">"#)
/// }
/// # async fn submit(_: Context) -> &'static str { "saved" }
///
/// let app = App::new()
///     .with(csrf())
///     .get("/form", form)
///     .post("/form", submit);
/// ```
pub fn csrf() -> Csrf {
    csrf_with(CsrfConfig::default())
}

pub fn csrf_with(config: CsrfConfig) -> Csrf {
    Csrf { config: Arc::new(config) }
}

impl Csrf {
    fn cookie(&self, token: &str) -> String {
        let c = &self.config;
        let mut cookie = format!("{}={token}; Path={}", c.cookie_name, c.cookie_path);
        if c.cookie_http_only {
            cookie.push_str("; HttpOnly");
        }
        if !c.cookie_same_site.is_empty() {
            cookie.push_str("; SameSite=");
            cookie.push_str(&c.cookie_same_site);
        }
        cookie
    }

    fn submitted(&self, ctx: &Context) -> Option<String> {
        match &self.config.lookup {
            TokenLookup::Form(field) => ctx.form_value(field),
            TokenLookup::Header(name) => ctx.header(name).map(str::to_owned),
        }
    }
}

impl Middleware for Csrf {
    fn handle(&self, mut ctx: Context, next: Next) -> BoxFuture<Response> {
        let safe = matches!(*ctx.method(), Method::GET | Method::HEAD | Method::OPTIONS);

        if safe {
            let token = generate_token(self.config.token_length);
            let cookie = self.cookie(&token);
            ctx.set(self.config.context_key.clone(), token);
            return Box::pin(async move {
                let mut res = next.run(ctx).await;
                match HeaderValue::try_from(cookie) {
                    Ok(value) => {
                        res.headers_mut().append(SET_COOKIE, value);
                    }
                    Err(_) => warn!("invalid csrf cookie settings, cookie not sent"),
                }
                res
            });
        }

        let Some(expected) = ctx.cookie(&self.config.cookie_name).map(str::to_owned) else {
            debug!(path = ctx.path(), "csrf cookie missing");
            return Box::pin(async { Response::forbidden("CSRF token missing") });
        };
        let submitted = match self.submitted(&ctx) {
            Some(token) if !token.is_empty() => token,
            _ => return Box::pin(async { Response::forbidden("CSRF token not provided") }),
        };
        if !tokens_match(&expected, &submitted) {
            debug!(path = ctx.path(), "csrf token mismatch");
            return Box::pin(async { Response::forbidden("CSRF token invalid") });
        }

        ctx.set(self.config.context_key.clone(), expected);
        Box::pin(next.run(ctx))
    }
}

fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compare without stopping at the first differing byte.
fn tokens_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
