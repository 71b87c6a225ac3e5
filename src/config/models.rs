//! Configuration data structures for Periscope.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! intentionally serde‑friendly and include defaults so that running with no config
//! file at all yields a working gateway on port 3000.
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
///
/// Every field has a default; a missing config file is equivalent to
/// `GatewayConfig::default()`. The listening port can additionally be
/// overridden through the `PORT` environment variable (see
/// [`crate::config::loader`]).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on. Every worker binds this same address
    /// with `SO_REUSEPORT`; the kernel distributes accepted connections.
    pub listen_addr: String,
    /// The hostname the gateway is publicly reachable at. A proxy target
    /// whose host equals this value is rejected as a self-loop.
    pub public_host: String,
    /// Number of worker threads. `0` means one per available CPU.
    pub workers: usize,
    /// Lifetime of a cached transformed response, in seconds.
    pub cache_ttl_secs: u64,
    /// Quality passed to the WebP encoder when transcoding images (0–100).
    pub webp_quality: f32,
    /// Budget for a single upstream fetch, in seconds. Exceeding it yields
    /// a 504 to the client.
    pub upstream_timeout_secs: u64,
    /// Maximum number of upstream redirects followed per request.
    pub max_redirects: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            public_host: "localhost".to_string(),
            workers: 0,
            cache_ttl_secs: 60,
            webp_quality: 75.0,
            upstream_timeout_secs: 30,
            max_redirects: 5,
        }
    }
}

impl GatewayConfig {
    /// Effective worker count: the configured value, or one per available
    /// processing unit when set to `0`.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Parse the configured listen address.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.listen_addr.parse()
    }
}
