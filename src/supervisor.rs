//! Multi-worker execution model.
//!
//! The supervisor spawns one worker per available processing unit. Each
//! worker is an OS thread running its own single-threaded tokio runtime,
//! its own listener (every worker binds the same port with `SO_REUSEPORT`,
//! the kernel balances accepted connections), its own upstream client and
//! its own response cache. Workers share nothing, so one worker's failure
//! never affects its siblings.
//!
//! A worker exit — clean return, error, or panic — is reported to the
//! supervisor over a channel and answered by spawning a replacement
//! immediately. There is no backoff and no crash-loop limit; the
//! replacement starts with a fresh, empty cache.
use std::{convert::Infallible, net::SocketAddr, sync::Arc, sync::mpsc, thread, time::Duration};

use axum::{Router, body::Body, extract::Request, response::Response, routing::any};
use eyre::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tower_http::compression::CompressionLayer;

use crate::{
    adapters::{HyperUpstream, ProxyHandler},
    config::GatewayConfig,
    core::cache::ResponseCache,
    ports::upstream::UpstreamClient,
};

/// Spawns and resurrects the gateway's worker threads.
pub struct WorkerSupervisor {
    config: Arc<GatewayConfig>,
}

/// Reports a worker's id to the supervisor when the worker terminates for
/// any reason, including a panic unwinding through the worker thread.
struct ExitNotifier {
    id: usize,
    tx: mpsc::Sender<usize>,
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let _ = self.tx.send(self.id);
    }
}

impl WorkerSupervisor {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }

    /// Run the supervision loop. Blocks for the lifetime of the process.
    pub fn run(&self) -> Result<()> {
        let addr = self
            .config
            .listen_socket_addr()
            .context("Failed to parse listen address")?;
        let worker_count = self.config.worker_count();

        tracing::info!(
            "Starting Periscope gateway on {} with {} workers",
            addr,
            worker_count
        );

        let (exit_tx, exit_rx) = mpsc::channel::<usize>();

        for id in 0..worker_count {
            Self::spawn_worker(id, addr, self.config.clone(), exit_tx.clone())?;
        }

        // The supervisor holds its own sender, so recv() can only yield
        // worker exits.
        loop {
            let id = exit_rx
                .recv()
                .context("worker exit channel closed unexpectedly")?;
            tracing::warn!("Worker {id} exited, spawning replacement");
            Self::spawn_worker(id, addr, self.config.clone(), exit_tx.clone())?;
        }
    }

    fn spawn_worker(
        id: usize,
        addr: SocketAddr,
        config: Arc<GatewayConfig>,
        exit_tx: mpsc::Sender<usize>,
    ) -> Result<()> {
        thread::Builder::new()
            .name(format!("periscope-worker-{id}"))
            .spawn(move || {
                let _notifier = ExitNotifier { id, tx: exit_tx };
                if let Err(e) = run_worker(id, addr, config) {
                    tracing::error!("Worker {id} terminated with error: {e:#}");
                }
            })
            .with_context(|| format!("Failed to spawn worker thread {id}"))?;
        Ok(())
    }
}

/// Worker body: a single-threaded runtime driving the full pipeline.
fn run_worker(id: usize, addr: SocketAddr, config: Arc<GatewayConfig>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build worker runtime")?;

    runtime.block_on(serve_worker(id, addr, config))
}

async fn serve_worker(id: usize, addr: SocketAddr, config: Arc<GatewayConfig>) -> Result<()> {
    let listener = bind_reuseport(addr)?;

    let upstream: Arc<dyn UpstreamClient> = Arc::new(
        HyperUpstream::new(
            Duration::from_secs(config.upstream_timeout_secs),
            config.max_redirects,
        )
        .context("Failed to create upstream client")?,
    );
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(
        config.cache_ttl_secs,
    )));
    let handler = Arc::new(ProxyHandler::new(upstream, cache.clone(), config));

    tokio::spawn(sweep_expired_entries(cache));

    let make_request_route = |handler: Arc<ProxyHandler>| {
        any(move |req: Request| {
            let handler = handler.clone();
            async move {
                match handler.handle_request(req).await {
                    Ok(response) => Ok::<Response<Body>, Infallible>(response),
                    Err(e) => {
                        tracing::error!("Request handling error: {:?}", e);
                        let error_response = Response::builder()
                            .status(500)
                            .body(Body::from("Internal Server Error"))
                            .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error")));
                        Ok(error_response)
                    }
                }
            }
        })
    };

    let app = Router::new()
        .route("/{*path}", make_request_route(handler.clone()))
        .route("/", make_request_route(handler))
        .layer(CompressionLayer::new());

    tracing::info!("Worker {id} listening on {addr}");

    axum::serve(listener, app)
        .await
        .context("Worker server error")
}

/// Drop expired cache entries periodically so pages that are never
/// revisited do not pile up for the lifetime of the worker.
async fn sweep_expired_entries(cache: Arc<ResponseCache>) {
    let period = cache.ttl().max(Duration::from_secs(1));
    loop {
        tokio::time::sleep(period).await;
        cache.purge_expired().await;
    }
}

/// Bind `addr` with `SO_REUSEPORT` so every worker can listen on the same
/// port and let the kernel distribute connections.
fn bind_reuseport(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .context("Failed to create listening socket")?;

    socket
        .set_reuseaddr(true)
        .context("Failed to set SO_REUSEADDR")?;
    #[cfg(unix)]
    socket
        .set_reuseport(true)
        .context("Failed to set SO_REUSEPORT")?;

    socket
        .bind(addr)
        .with_context(|| format!("Failed to bind {addr}"))?;
    socket.listen(1024).context("Failed to listen")
}
