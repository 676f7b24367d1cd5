//! Health-check handlers.
//!
//! | Endpoint | Typical path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! [`liveness`] and [`readiness`] are plain handlers with no dependencies.
//! When readiness should depend on a database or a downstream service,
//! register named checks on a [`HealthChecker`]:
//!
//! ```rust
//! use kese::App;
//! use kese::health::HealthChecker;
//!
//! let checker = HealthChecker::new();
//! checker.add_check("database", || -> Result<(), String> { Ok(()) });
//!
//! let app = App::new()
//!     .get("/healthz", checker.liveness_handler())
//!     .get("/readyz", checker.readiness_handler());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;

use crate::context::Context;
use crate::handler::Handler;
use crate::response::Response;

/// Liveness handler: always `200 ok`.
pub async fn liveness(_ctx: Context) -> Response {
    Response::text("ok")
}

/// Readiness handler with no dependencies: always `200 ready`.
pub async fn readiness(_ctx: Context) -> Response {
    Response::text("ready")
}

/// Overall result of a [`HealthChecker::check`] run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

type CheckFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A set of named health checks.
///
/// Cloning is cheap and clones share the same checks, so checks can be added
/// or removed after the handlers were registered.
#[derive(Clone, Default)]
pub struct HealthChecker {
    checks: Arc<RwLock<BTreeMap<String, CheckFn>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the check called `name`. It passes when it returns
    /// `Ok`; the error text is reported otherwise.
    pub fn add_check<F, E>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let check: CheckFn = Arc::new(move || check().map_err(|e| e.to_string()));
        self.checks.write().insert(name.into(), check);
    }

    pub fn remove_check(&self, name: &str) {
        self.checks.write().remove(name);
    }

    /// Run every check. Each result is `"ok"` or the check's error text.
    pub fn check(&self) -> (HealthStatus, BTreeMap<String, String>) {
        // Run the checks unlocked so a check may add or remove checks.
        let checks: Vec<(String, CheckFn)> = self.checks.read()
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let mut status = HealthStatus::Healthy;
        let results = checks.into_iter()
            .map(|(name, check)| {
                let outcome = match check() {
                    Ok(()) => "ok".to_owned(),
                    Err(e) => {
                        status = HealthStatus::Unhealthy;
                        e
                    }
                };
                (name, outcome)
            })
            .collect();
        (status, results)
    }

    /// `200` when every check passes, `503` otherwise, with the body
    /// `{"status": "healthy" | "unhealthy", "checks": {name: result}}`.
    pub fn handler(&self) -> impl Handler + use<> {
        let checker = self.clone();
        move |_ctx: Context| {
            let checker = checker.clone();
            async move {
                let (status, checks) = checker.check();
                let code = match status {
                    HealthStatus::Healthy => StatusCode::OK,
                    HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
                };
                Response::builder()
                    .status(code)
                    .json(&json!({ "status": status, "checks": checks }))
            }
        }
    }

    /// Always `200 {"status":"alive"}`.
    pub fn liveness_handler(&self) -> impl Handler + use<> {
        |_ctx: Context| async { Response::json(&json!({ "status": "alive" })) }
    }

    /// Same as [`HealthChecker::handler`].
    pub fn readiness_handler(&self) -> impl Handler + use<> {
        self.handler()
    }
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("checks", &self.checks.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ErasedHandler;
    use serde_json::Value;

    fn ctx() -> Context {
        Context::new(http::Method::GET, "/health".parse().unwrap(), Default::default(), Default::default())
    }

    async fn call(handler: impl Handler) -> Response {
        handler.into_boxed_handler().call(ctx()).await
    }

    fn body(res: &Response) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[test]
    fn no_checks_is_healthy() {
        let (status, results) = HealthChecker::new().check();
        assert_eq!(status, HealthStatus::Healthy);
        assert!(results.is_empty());
    }

    #[test]
    fn failing_check_reports_its_error() {
        let checker = HealthChecker::new();
        checker.add_check("db", || -> Result<(), String> { Ok(()) });
        checker.add_check("cache", || Err("connection refused"));

        let (status, results) = checker.check();
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(results["db"], "ok");
        assert_eq!(results["cache"], "connection refused");

        checker.remove_check("cache");
        assert_eq!(checker.check().0, HealthStatus::Healthy);
    }

    #[test]
    fn checks_may_change_the_checker() {
        let checker = HealthChecker::new();
        let handle = checker.clone();
        checker.add_check("bootstrap", move || -> Result<(), String> {
            handle.remove_check("bootstrap");
            handle.add_check("steady", || -> Result<(), String> { Ok(()) });
            Ok(())
        });

        let (status, results) = checker.check();
        assert_eq!(status, HealthStatus::Healthy);
        assert_eq!(results["bootstrap"], "ok");

        let (_, results) = checker.check();
        assert_eq!(results.keys().collect::<Vec<_>>(), ["steady"]);
    }

    #[tokio::test]
    async fn handler_status_codes() {
        let checker = HealthChecker::new();
        checker.add_check("db", || -> Result<(), String> { Ok(()) });

        let res = call(checker.handler()).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(body(&res), json!({ "status": "healthy", "checks": { "db": "ok" } }));

        // Checks added after the handler was built still count.
        checker.add_check("queue", || Err("backlog too large"));
        let res = call(checker.readiness_handler()).await;
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body(&res)["status"], "unhealthy");
        assert_eq!(body(&res)["checks"]["queue"], "backlog too large");
    }

    #[tokio::test]
    async fn liveness_ignores_checks() {
        let checker = HealthChecker::new();
        checker.add_check("db", || Err("down"));
        let res = call(checker.liveness_handler()).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(body(&res), json!({ "status": "alive" }));
    }

    #[tokio::test]
    async fn plain_health_handlers() {
        assert_eq!(call(liveness).await.body().as_ref(), b"ok");
        assert_eq!(call(readiness).await.body().as_ref(), b"ready");
    }
}
