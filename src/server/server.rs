//! # Server - Listener and Dispatch
//!
//! Owns the listening socket and the worker pool. The accept loop runs on
//! tokio and hands each accepted connection, as a blocking std stream, to the
//! pool:
//!
//! ```text
//! LISTENING --accept--> dispatch to pool --> LISTENING
//!     |
//!     +-- shutdown notified --> close listener, drain pool
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::config::ServerConfig;
use super::handler::ConnectionHandler;
use super::metrics::ConnectionGuard;
use super::pipeline::{ServerCore, ServerSummary};
use super::pool::WorkerPool;
use super::shutdown::ShutdownHandle;
use crate::success;

/// Pause after a failed `accept()` so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub struct Server {
    core: Arc<ServerCore>,
    listener: TcpListener,
    pool: WorkerPool,
    shutdown: ShutdownHandle,
    local_addr: SocketAddr,
}

impl Server {
    /// Validate the config, bind the socket and start the workers.
    ///
    /// # Arguments
    /// - `config`: Resolved server settings (file + CLI flags)
    ///
    /// # Returns
    /// - `Ok(Server)`: Listening socket bound, workers running
    /// - `Err`: Invalid config, unresolvable host or bind/listen failure.
    ///   Any error here is a startup failure; the binary exits non-zero.
    ///
    /// # Example
    /// ```ignore
    /// let server = Server::bind(ServerConfig::default()).await?;
    /// let shutdown = server.shutdown_handle();
    /// let summary = server.run().await?;
    /// ```
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let address = config.bind_address();
        let addr = tokio::net::lookup_host(address.as_str())
            .await
            .with_context(|| format!("failed to resolve {}", address))?
            .next()
            .ok_or_else(|| anyhow!("no address found for {}", address))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("Socket creation failed")?;
        socket.set_reuseaddr(true)?;
        socket
            .bind(addr)
            .with_context(|| format!("Bind failed on {}", addr))?;
        let listener = socket
            .listen(config.listen_backlog())
            .context("Listen failed")?;
        let local_addr = listener.local_addr()?;

        let workers = config.worker_count();
        let pool = WorkerPool::new(workers).context("failed to start worker threads")?;

        let shutdown = ShutdownHandle::new();
        let threads_label = if config.threads > 0 {
            config.threads.to_string()
        } else {
            format!("auto ({})", workers)
        };
        let mut banner = format!(
            "Smart Grid Server listening on {} (expecting {} devices, threads={}",
            local_addr, config.devices, threads_label
        );
        if config.benchmark_sums > 0 {
            banner.push_str(&format!(
                ", benchmark target: {} summations",
                config.benchmark_sums
            ));
        } else if config.benchmark_readings > 0 {
            banner.push_str(&format!(
                ", benchmark target: {} readings",
                config.benchmark_readings
            ));
        }
        banner.push(')');
        success!("{}", banner);

        let core = ServerCore::new(config, workers, shutdown.clone());

        Ok(Self {
            core,
            listener,
            pool,
            shutdown,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for stopping the server from outside, e.g. a signal listener.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn core(&self) -> Arc<ServerCore> {
        Arc::clone(&self.core)
    }

    /// Accept connections until shutdown, then drain the pool.
    ///
    /// # Returns
    /// Counters as they stood after every connection handler finished.
    pub async fn run(self) -> Result<ServerSummary> {
        let Server {
            core,
            listener,
            mut pool,
            shutdown,
            ..
        } = self;

        info!("🚀 Server running - waiting for connections...");

        while !shutdown.is_triggered() {
            tokio::select! {
                _ = shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => dispatch(&core, &pool, stream, peer),
                    Err(_) if shutdown.is_triggered() => break,
                    Err(e) => {
                        error!("❌ Accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        info!("🛑 Server stopped accepting connections");

        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .context("worker pool shutdown panicked")?;

        let summary = core.summary();
        info!(
            "📋 Final totals: {} readings, {} sums, {} anomalies, {} dropped readings in {:.2}s ({} device keys cached)",
            summary.total_readings,
            summary.total_sums,
            summary.anomalies,
            summary.failed_readings,
            summary.elapsed.as_secs_f64(),
            core.decryptor().key_store().len()
        );
        Ok(summary)
    }
}

/// Convert to a blocking stream and queue the connection on the pool.
fn dispatch(core: &Arc<ServerCore>, pool: &WorkerPool, stream: TcpStream, peer: SocketAddr) {
    let stream = match prepare_stream(stream, core.config().idle_poll()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("❌ Failed to set up connection from {}: {}", peer, e);
            return;
        }
    };

    let guard = ConnectionGuard::open(Arc::clone(core.counters()));
    debug!(
        "🔗 Accepted connection from {} ({} connected)",
        peer,
        core.counters().connected_devices()
    );

    let core = Arc::clone(core);
    pool.enqueue(move || {
        ConnectionHandler::new(core, stream, peer, guard).run();
    });
}

fn prepare_stream(stream: TcpStream, idle_poll: Duration) -> std::io::Result<std::net::TcpStream> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(idle_poll))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
