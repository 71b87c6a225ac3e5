//! Periscope - a transparent forwarding HTTP/WebSocket gateway.
//!
//! A client requests `http://gateway/<scheme>://<target-host>/<path>` and
//! Periscope fetches the target resource, rewrites its body so every
//! embedded sub-resource reference also routes back through the gateway,
//! and returns the transformed response. A browser can navigate an
//! arbitrary site entirely through one endpoint.
//!
//! # Features
//! - Target extraction from the inbound path with a self-loop guard
//! - Full-body buffering and content-type driven transformation:
//!   HTML rewriting (base/favicon injection + reference re-pointing),
//!   WebP image transcoding, passthrough for everything else
//! - Security-header stripping and permissive CORS on proxied responses
//! - Transparent WebSocket relaying
//! - A short-TTL per-worker response cache
//! - A multi-worker execution model with unconditional restart on exit
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use periscope::{WorkerSupervisor, config::GatewayConfig};
//!
//! # fn main() -> eyre::Result<()> {
//! let config = Arc::new(GatewayConfig::default());
//! WorkerSupervisor::new(config).run()?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping the transformation pipeline inside
//! `core`. End users should prefer the re-exports documented below instead
//! of reaching into internal modules directly.
//!
//! # Error Handling
//! All fallible APIs return `eyre::Result<T>` or a domain specific error
//! type. Upstream failures surface to clients as 502/504-class responses;
//! transform failures degrade to less-processed content and never fail a
//! request.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod ports;
pub mod supervisor;
pub mod tracing_setup;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HyperUpstream, ProxyHandler},
    core::cache::ResponseCache,
    ports::upstream::UpstreamClient,
    supervisor::WorkerSupervisor,
};
