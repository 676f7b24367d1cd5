//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close.
//! 3. Waiting up to [`ServerConfig::shutdown_timeout`] for them, then
//!    aborting whatever is left.
//! 4. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Keep `shutdown_timeout` below `terminationGracePeriodSeconds`.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::config::ServerConfig;
use crate::error::Error;

/// The HTTP server.
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
}

impl Server {
    /// A server listening on `addr` with the default settings.
    ///
    /// ```rust
    /// use kese::Server;
    ///
    /// assert!(Server::bind("0.0.0.0:3000").is_ok());
    /// assert!(Server::bind("localhost").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|_| Error::Addr(addr.to_owned()))?;
        Ok(Self::from_config(ServerConfig { addr, ..ServerConfig::default() }))
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve `app` until SIGTERM or Ctrl-C, then shut down gracefully.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Serve `app` until `signal` resolves, then shut down gracefully.
    ///
    /// Fails only if the listener cannot be bound. The app's body limit is
    /// replaced with [`ServerConfig::body_limit`].
    pub async fn serve_with_shutdown(
        self,
        app: App,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.config.addr).await?;
        let app = Arc::new(app.body_limit(self.config.body_limit));

        info!(addr = %self.config.addr, "kese listening");

        // Flipped once on shutdown; every connection task watches it.
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops accepting at once,
                // even with more connections queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let mut stop = stop_rx.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |mut req: Request<Incoming>| {
                            req.extensions_mut().insert(peer);
                            let app = Arc::clone(&app);
                            async move { Ok::<_, Infallible>(app.dispatch(req).await) }
                        });

                        // HTTP/1.1 or HTTP/2, whatever the client speaks.
                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        tokio::pin!(conn);

                        let res = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = stop.changed() => {
                                debug!(%peer, "closing connection for shutdown");
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = res {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout = ?self.config.shutdown_timeout,
                "shutdown timeout elapsed, aborting connections",
            );
            tasks.shutdown().await;
        }

        info!("kese stopped");
        Ok(())
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A handler that fails to install is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
