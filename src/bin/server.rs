//! # Server Binary Entry Point
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin server -- --devices 1000 --benchmark-sums 50 \
//!   --metrics metrics/run.csv --quiet
//! cargo run --release --bin server -- --config config/server.toml --port 9000
//! ```
//!
//! Flags override values from the optional TOML file. Exit code is 0 on
//! Ctrl-C/SIGTERM or benchmark completion, non-zero if the server cannot start.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use grid_ingest::common::config::load_config;
use grid_ingest::logging::init_logger;
use grid_ingest::server::{Server, ServerConfig, ShutdownHandle};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about = "Smart grid telemetry ingestion server", long_about = None)]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server port (default: 8890)
    #[arg(short, long)]
    port: Option<u16>,

    /// Interface to bind (default: 0.0.0.0)
    #[arg(long)]
    host: Option<String>,

    /// Expected number of devices (default: 100)
    #[arg(short, long)]
    devices: Option<usize>,

    /// Sum every N readings (default: one per expected device)
    #[arg(short, long)]
    sum_interval: Option<usize>,

    /// Stop after N readings and write metrics
    #[arg(long)]
    benchmark_readings: Option<u64>,

    /// Stop after N power summations and write metrics
    #[arg(long)]
    benchmark_sums: Option<u64>,

    /// Append CSV benchmark metrics to FILE
    #[arg(long, value_name = "FILE")]
    metrics: Option<PathBuf>,

    /// Worker threads (default: auto)
    #[arg(long)]
    threads: Option<usize>,

    /// Wire current is amps times this value (default: 10)
    #[arg(long)]
    current_divisor: Option<f64>,

    /// Suppress periodic throughput logs
    #[arg(long)]
    quiet: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(devices) = self.devices {
            config.devices = devices;
        }
        if let Some(sum_interval) = self.sum_interval {
            config.sum_interval = sum_interval;
        }
        if let Some(target) = self.benchmark_readings {
            config.benchmark_readings = target;
        }
        if let Some(target) = self.benchmark_sums {
            config.benchmark_sums = target;
        }
        if self.metrics.is_some() {
            config.metrics_file = self.metrics;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(divisor) = self.current_divisor {
            config.current_divisor = divisor;
        }
        config.quiet |= self.quiet;

        Ok(config)
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => error!("❌ Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn spawn_signal_listener(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Received shutdown signal - shutting down gracefully");
        shutdown.trigger();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let config = Args::parse().into_config()?;

    info!("Smart Grid Server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: Port={}, Expected Devices={}, Sum Interval={}, Threads={}",
        config.port,
        config.devices,
        config.effective_sum_interval(),
        if config.threads > 0 {
            config.threads.to_string()
        } else {
            "auto".to_string()
        }
    );

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("❌ {:#}", e);
            return Err(e);
        }
    };

    spawn_signal_listener(server.shutdown_handle());
    server.run().await?;

    Ok(())
}
