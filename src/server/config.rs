use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on auto-sized worker pools.
pub const MAX_AUTO_WORKERS: usize = 120;

/// Upper bound on the listen backlog.
pub const MAX_BACKLOG: u32 = 1024;

/// Server configuration. Every field has a default, so a TOML file only
/// needs the keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Expected device population; sizes the log interval and listen backlog.
    pub devices: usize,
    /// Readings per power sum. 0 means "one per expected device".
    pub sum_interval: usize,
    /// Stop after this many readings (0 = off). Ignored when `benchmark_sums` is set.
    pub benchmark_readings: u64,
    /// Stop after this many completed sums (0 = off).
    pub benchmark_sums: u64,
    pub metrics_file: Option<PathBuf>,
    /// Suppress periodic throughput lines.
    pub quiet: bool,
    /// Worker threads. 0 derives from available parallelism.
    pub threads: usize,
    /// Wire current is `amps * current_divisor`.
    pub current_divisor: f64,
    /// How often an idle connection re-checks for shutdown.
    pub idle_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8890,
            devices: 100,
            sum_interval: 0,
            benchmark_readings: 0,
            benchmark_sums: 0,
            metrics_file: None,
            quiet: false,
            threads: 0,
            current_divisor: 10.0,
            idle_poll_ms: 500,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.effective_sum_interval() > 0,
            "sum interval must be at least 1 (set sum_interval or devices)"
        );
        ensure!(
            self.current_divisor.is_finite() && self.current_divisor > 0.0,
            "current divisor must be a positive number, got {}",
            self.current_divisor
        );
        ensure!(self.idle_poll_ms > 0, "idle_poll_ms must be positive");
        Ok(())
    }

    pub fn effective_sum_interval(&self) -> usize {
        if self.sum_interval > 0 {
            self.sum_interval
        } else {
            self.devices
        }
    }

    /// Readings between throughput log lines.
    pub fn log_interval(&self) -> u64 {
        (self.devices as u64 / 100).max(100)
    }

    pub fn listen_backlog(&self) -> u32 {
        u32::try_from(self.devices)
            .unwrap_or(MAX_BACKLOG)
            .clamp(1, MAX_BACKLOG)
    }

    pub fn worker_count(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        (cores * 2).min(MAX_AUTO_WORKERS)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Address string handed to the resolver.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::load_config;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8890);
        assert_eq!(config.effective_sum_interval(), 100);
        assert_eq!(config.log_interval(), 100);
        assert_eq!(config.listen_backlog(), 100);
        assert!(config.worker_count() >= 1);
        assert!(config.worker_count() <= MAX_AUTO_WORKERS);
        config.validate().unwrap();
    }

    #[test]
    fn test_derived_values_scale_with_devices() {
        let config = ServerConfig {
            devices: 50_000,
            sum_interval: 10,
            threads: 16,
            ..ServerConfig::default()
        };
        assert_eq!(config.effective_sum_interval(), 10);
        assert_eq!(config.log_interval(), 500);
        assert_eq!(config.listen_backlog(), MAX_BACKLOG);
        assert_eq!(config.worker_count(), 16);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let no_interval = ServerConfig {
            devices: 0,
            sum_interval: 0,
            ..ServerConfig::default()
        };
        assert!(no_interval.validate().is_err());

        let bad_divisor = ServerConfig {
            current_divisor: 0.0,
            ..ServerConfig::default()
        };
        assert!(bad_divisor.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 9100\ndevices = 500\nbenchmark_sums = 5\nmetrics_file = \"out/metrics.csv\""
        )
        .unwrap();

        let config: ServerConfig = load_config(file.path()).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.devices, 500);
        assert_eq!(config.benchmark_sums, 5);
        assert_eq!(config.metrics_file, Some(PathBuf::from("out/metrics.csv")));
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.current_divisor, 10.0);
    }

    #[test]
    fn test_bundled_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/server.toml");
        let config: ServerConfig = load_config(path).unwrap();
        assert_eq!(config.devices, 1000);
        assert_eq!(config.effective_sum_interval(), 1000);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result: Result<ServerConfig> = load_config("/nonexistent/server.toml");
        assert!(result.is_err());
    }
}
