//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::app::DEFAULT_BODY_LIMIT;

/// Settings for [`Server`](crate::Server).
///
/// Implements `Deserialize` so it can be loaded from whatever format the
/// service already uses. Missing fields take their defaults and
/// `shutdown_timeout` is given in seconds:
///
/// ```rust
/// use kese::ServerConfig;
///
/// let config: ServerConfig = serde_json::from_str(r#"{ "addr": "127.0.0.1:8080", "shutdown_timeout": 5 }"#).unwrap();
/// assert_eq!(config.addr.port(), 8080);
/// assert_eq!(config.shutdown_timeout.as_secs(), 5);
/// assert_eq!(config.body_limit, 10 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address. Default `0.0.0.0:3000`.
    pub addr: SocketAddr,
    /// How long in-flight connections may run after a shutdown signal before
    /// they are aborted. Default 30 s.
    #[serde(deserialize_with = "seconds")]
    pub shutdown_timeout: Duration,
    /// Request body limit in bytes. Default 10 MiB.
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            shutdown_timeout: Duration::from_secs(30),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}
