//! Minimal kese example: JSON CRUD endpoints, middleware, a route group and
//! health checks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42
//!   curl -X POST http://localhost:3000/api/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice","email":"alice@example.com"}'
//!   curl -X DELETE http://localhost:3000/api/users/42
//!   curl 'http://localhost:3000/search?q=rust&page=2'
//!   curl http://localhost:3000/healthz
//!   curl --compressed http://localhost:3000/assets/index.html

use std::time::Duration;

use kese::health::HealthChecker;
use kese::middleware::{cors, gzip, logger, rate_limit, recovery, request_id, secure_headers};
use kese::{App, Context, Error, Response, Server, StatusCode, ValidationError};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct NewUser {
    name: String,
    email: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let health = HealthChecker::new();
    health.add_check("storage", || -> Result<(), String> { Ok(()) });

    let app = App::new()
        .with(recovery())
        .with(logger())
        .with(request_id())
        .with(secure_headers())
        .with(gzip())
        .static_dir("/assets", "./public")
        .get("/healthz", health.liveness_handler())
        .get("/readyz", health.readiness_handler())
        .get("/search", search)
        .group("/api", |api| {
            api.with(cors())
                .with(rate_limit(100, Duration::from_secs(60)))
                .get("/users/:id", get_user)
                .post("/users", create_user)
                .delete("/users/:id", delete_user)
        });

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

// GET /api/users/:id
async fn get_user(ctx: Context) -> Response {
    let id = ctx.param("id").unwrap_or_default();
    Response::success(&json!({ "id": id, "name": "alice" }))
}

// POST /api/users
//
// A malformed body becomes a 400 through the `?`; field problems become a
// 400 listing each field.
async fn create_user(ctx: Context) -> Result<Response, Error> {
    let user: NewUser = ctx.json()?;

    let mut invalid = ValidationError::new();
    if user.name.trim().is_empty() {
        invalid.add("name", "must not be empty");
    }
    if !user.email.contains('@') {
        invalid.add("email", "must be an email address");
    }
    if invalid.has_errors() {
        return Err(invalid.into());
    }

    let res = Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/api/users/99")
        .json(&json!({ "id": "99", "name": user.name, "email": user.email }));
    Ok(res)
}

// DELETE /api/users/:id → 204 No Content
async fn delete_user(_ctx: Context) -> Response {
    Response::no_content()
}

// GET /search?q=..&page=..
async fn search(ctx: Context) -> Response {
    let q = ctx.query_or("q", "");
    let page = ctx.query_or("page", "1");
    Response::success(&json!({ "query": q, "page": page }))
}
