//! # kese
//!
//! A small HTTP framework for Rust services: a radix-tree router, a request
//! context, composable middleware and graceful shutdown on top of hyper.
//!
//! ## What's in the box
//!
//! - Radix-tree routing with `:name` parameters. Literal segments beat
//!   parameters and a lookup never backtracks ([`Router`])
//! - A per-request [`Context`] with params, query, form fields, headers,
//!   cookies, JSON body and a typed value store
//! - Middleware applied at registration time, plus route groups
//!   ([`middleware`], [`App::group`])
//! - Built-in middleware for logging, recovery, CORS, security headers,
//!   rate limits, response caching, gzip and CSRF
//! - Static files ([`App::static_dir`], [`App::static_file`])
//! - Handler errors mapped to responses by a replaceable [`ErrorHandler`]
//! - Health checks ([`health`]) and graceful shutdown on SIGTERM / Ctrl-C
//!   ([`Server`])
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kese::{App, Context, Error, Response, Server};
//! use kese::middleware::{logger, recovery};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let app = App::new()
//!         .with(logger())
//!         .with(recovery())
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_user(ctx: Context) -> Response {
//!     let id = ctx.param("id").unwrap_or_default();
//!     Response::success(&serde_json::json!({ "id": id }))
//! }
//!
//! async fn create_user(ctx: Context) -> Result<Response, Error> {
//!     let user: NewUser = ctx.json()?;
//!     Ok(Response::created(&serde_json::json!({ "name": user.name })))
//! }
//! ```
//!
//! kese never installs a `tracing` subscriber; binaries choose their own.

mod app;
mod config;
mod context;
mod error;
mod handler;
mod params;
mod response;
mod router;
mod server;
mod static_files;

pub mod health;
pub mod middleware;

pub use app::{App, Group, DEFAULT_BODY_LIMIT};
pub use config::ServerConfig;
pub use context::Context;
pub use error::{default_error_handler, Error, ErrorHandler, ValidationError};
pub use handler::{BoxFuture, Handler, HandlerResult, IntoHandlerResult};
pub use http::{Method, StatusCode};
pub use params::{Param, Params};
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{split_path, RouteMatch, Router};
pub use server::Server;
