//! Serving files from disk.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use tracing::error;

use crate::app::App;
use crate::context::Context;
use crate::response::Response;

const FILE_PARAM: &str = "filepath";

impl App {
    /// Serve the files directly inside `dir` under `prefix`:
    /// `static_dir("/assets", "./public")` answers `/assets/app.css` with
    /// `./public/app.css`.
    ///
    /// Only one level is served, since the route is `<prefix>/:filepath`.
    /// Names that would leave `dir` get `403 Forbidden`; missing files and
    /// directories get `404 Not Found`.
    pub fn static_dir(self, prefix: &str, dir: impl Into<PathBuf>) -> Self {
        let root = Arc::new(dir.into());
        let route = format!("{}/:{FILE_PARAM}", prefix.trim_end_matches('/'));
        self.get(&route, move |ctx: Context| {
            let root = Arc::clone(&root);
            async move {
                let name = ctx.param(FILE_PARAM).unwrap_or_default();
                match resolve(&root, name) {
                    Ok(path) => serve(&path).await,
                    Err(res) => res,
                }
            }
        })
    }

    /// Serve one file at `path`: `static_file("/favicon.ico", "./assets/favicon.ico")`.
    pub fn static_file(self, path: &str, file: impl Into<PathBuf>) -> Self {
        let file = Arc::new(file.into());
        self.get(path, move |_ctx: Context| {
            let file = Arc::clone(&file);
            async move { serve(&file).await }
        })
    }
}

/// Join `name` onto `root`, refusing anything but a plain file name.
fn resolve(root: &Path, name: &str) -> Result<PathBuf, Response> {
    if name.is_empty() {
        return Err(not_found());
    }
    if name.contains('\\') {
        return Err(forbidden());
    }
    let mut path = root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(forbidden());
            }
        }
    }
    Ok(path)
}

async fn serve(path: &Path) -> Response {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return not_found(),
        Err(e) if e.kind() == ErrorKind::NotFound => return not_found(),
        Err(e) => {
            error!(path = %path.display(), "stat failed: {e}");
            return not_found();
        }
    }

    match tokio::fs::read(path).await {
        Ok(body) => Response::builder()
            .header("content-type", content_type(path))
            .body(body),
        Err(e) => {
            error!(path = %path.display(), "read failed: {e}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .text("Internal Server Error")
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css"          => "text/css; charset=utf-8",
        "js" | "mjs"   => "text/javascript; charset=utf-8",
        "json"         => "application/json",
        "txt"          => "text/plain; charset=utf-8",
        "xml"          => "application/xml",
        "svg"          => "image/svg+xml",
        "png"          => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "ico"          => "image/x-icon",
        "pdf"          => "application/pdf",
        "wasm"         => "application/wasm",
        "woff2"        => "font/woff2",
        _              => "application/octet-stream",
    }
}

fn not_found() -> Response {
    Response::builder().status(StatusCode::NOT_FOUND).text("404 Not Found")
}

fn forbidden() -> Response {
    Response::builder().status(StatusCode::FORBIDDEN).text("Forbidden")
}
