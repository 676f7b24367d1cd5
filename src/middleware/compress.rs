//! Gzip response compression.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::HeaderValue;
use tracing::warn;

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::response::Response;

/// Gzip settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipConfig {
    /// 0 (store) to 9 (smallest). Values above 9 are capped.
    pub level: u32,
    /// Bodies shorter than this are sent as they are.
    pub min_length: usize,
    /// Request paths ending in one of these are never compressed.
    pub excluded_extensions: Vec<String>,
    /// Request paths that are never compressed, matched exactly.
    pub excluded_paths: Vec<String>,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self {
            level: 6,
            min_length: 1024,
            excluded_extensions: [
                ".png", ".jpg", ".jpeg", ".gif", ".webp", ".ico",
                ".zip", ".gz", ".tar", ".rar", ".7z",
                ".mp4", ".avi", ".mov", ".mp3", ".wav",
                ".pdf",
            ]
            .map(String::from)
            .to_vec(),
            excluded_paths: Vec::new(),
        }
    }
}

/// Compresses response bodies for clients that send
/// `Accept-Encoding: gzip`.
///
/// Compressed responses get `Content-Encoding: gzip` and
/// `Vary: Accept-Encoding`. Responses that already carry a
/// `Content-Encoding` are left alone.
#[derive(Debug, Clone)]
pub struct Gzip {
    inner: Arc<Settings>,
}

#[derive(Debug)]
struct Settings {
    level: Compression,
    min_length: usize,
    excluded_extensions: Vec<String>,
    excluded_paths: HashSet<String>,
}

/// Gzip at level 6 for bodies of 1 KiB and up, skipping media and archives.
pub fn gzip() -> Gzip {
    gzip_with(GzipConfig::default())
}

pub fn gzip_with(config: GzipConfig) -> Gzip {
    Gzip {
        inner: Arc::new(Settings {
            level: Compression::new(config.level.min(9)),
            min_length: config.min_length,
            excluded_extensions: config.excluded_extensions,
            excluded_paths: config.excluded_paths.into_iter().collect(),
        }),
    }
}

impl Settings {
    fn applies_to(&self, ctx: &Context) -> bool {
        let accepts = ctx.headers()
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.contains("gzip"));
        let path = ctx.path();
        accepts
            && !self.excluded_paths.contains(path)
            && !self.excluded_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}

impl Middleware for Gzip {
    fn handle(&self, ctx: Context, next: Next) -> BoxFuture<Response> {
        if !self.inner.applies_to(&ctx) {
            return Box::pin(next.run(ctx));
        }

        let settings = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut res = next.run(ctx).await;
            if res.body().len() < settings.min_length || res.headers().contains_key(CONTENT_ENCODING) {
                return res;
            }

            match compress(res.body(), settings.level) {
                Ok(body) => {
                    res.set_body(body);
                    let headers = res.headers_mut();
                    headers.remove(CONTENT_LENGTH);
                    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    headers.append(VARY, HeaderValue::from_static("accept-encoding"));
                }
                Err(e) => warn!("gzip failed, sending uncompressed: {e}"),
            }
            res
        })
    }
}

fn compress(data: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    encoder.finish()
}
