pub mod handler;
pub mod upstream;
pub mod websocket;

/// Re-export commonly used types from adapters
pub use handler::ProxyHandler;
pub use upstream::HyperUpstream;
