//! # Server Core - Reading Pipeline
//!
//! State shared by every connection task: key cache, aggregator, counters
//! and the benchmark latch. Tasks hold it through an `Arc`; the aggregator's
//! completion callback holds only a `Weak` so there is no reference cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, error, info};

use super::aggregator::PowerSumProcessor;
use super::config::ServerConfig;
use super::metrics::{throughput, BenchmarkReport, ServerCounters};
use super::shutdown::ShutdownHandle;
use crate::common::connection::Frame;
use crate::common::reading::{MeterReading, RawReading};
use crate::crypto::{Decryptor, KeyStore};
use crate::error::ReadingError;
use crate::{alert, success};

/// Point-in-time view of the counters, logged at exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerSummary {
    pub total_readings: u64,
    pub total_sums: u64,
    pub anomalies: u64,
    pub failed_readings: u64,
    pub connected_devices: u64,
    pub elapsed: Duration,
}

pub struct ServerCore {
    config: ServerConfig,
    worker_count: usize,
    decryptor: Decryptor,
    processor: PowerSumProcessor,
    counters: Arc<ServerCounters>,
    first_reading: OnceLock<Instant>,
    finalized: AtomicBool,
    shutdown: ShutdownHandle,
}

impl ServerCore {
    /// Build the shared core. When a sum-count benchmark is configured the
    /// aggregator is wired to [`finalize_benchmark`](Self::finalize_benchmark).
    pub fn new(config: ServerConfig, worker_count: usize, shutdown: ShutdownHandle) -> Arc<Self> {
        Arc::new_cyclic(|core: &Weak<ServerCore>| {
            let processor = PowerSumProcessor::new(config.effective_sum_interval());

            if config.benchmark_sums > 0 {
                let core = core.clone();
                processor.set_benchmark_target(
                    config.benchmark_sums,
                    Box::new(move || {
                        if let Some(core) = core.upgrade() {
                            core.finalize_benchmark();
                        }
                    }),
                );
            }

            Self {
                config,
                worker_count,
                decryptor: Decryptor::new(KeyStore::new()),
                processor,
                counters: Arc::new(ServerCounters::new()),
                first_reading: OnceLock::new(),
                finalized: AtomicBool::new(false),
                shutdown,
            }
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn counters(&self) -> &Arc<ServerCounters> {
        &self.counters
    }

    pub fn processor(&self) -> &PowerSumProcessor {
        &self.processor
    }

    pub fn decryptor(&self) -> &Decryptor {
        &self.decryptor
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Decrypt, decode and process one frame.
    pub fn handle_frame(&self, frame: Frame) -> Result<(), ReadingError> {
        let Frame { device_id, payload } = frame;

        let plaintext = match self.decryptor.decrypt(&device_id, &payload) {
            Ok(plaintext) => plaintext,
            Err(source) => return Err(ReadingError::Decrypt { device_id, source }),
        };

        let raw = match RawReading::decode(&plaintext) {
            Ok(raw) => raw,
            Err(source) => return Err(ReadingError::Decode { device_id, source }),
        };

        if raw.display_id() != device_id {
            debug!(
                "Device {} reports sequence id {}",
                device_id,
                raw.display_id()
            );
        }

        let reading = MeterReading::from_raw(device_id, &raw, self.config.current_divisor);
        self.process_reading(&reading);
        Ok(())
    }

    /// Count, aggregate and inspect a decoded reading.
    pub fn process_reading(&self, reading: &MeterReading) {
        let now = Instant::now();
        let started = *self.first_reading.get_or_init(|| {
            info!("⏱️  First reading received - benchmark timer started");
            now
        });

        // Count first so a benchmark finalized by this window includes it.
        let total = self.counters.record_reading();
        self.processor.add_reading(reading.power);

        if self.rate_log_due(total) {
            let elapsed = now.duration_since(started).as_secs_f64();
            info!(
                "📊 Processed {} readings ({:.1} readings/sec, {} sums completed)",
                total,
                throughput(total, elapsed),
                self.processor.total_sums()
            );
        }

        if reading.is_anomalous() {
            self.counters.record_anomaly();
            alert!(
                "Anomaly detected - Device: {}, Power: {:.1}W, Voltage: {:.1}V",
                reading.device_id,
                reading.power,
                reading.voltage
            );
        }

        let target = self.config.benchmark_readings;
        if target > 0 && self.config.benchmark_sums == 0 && total >= target {
            self.finalize_benchmark();
        }
    }

    /// Whether the `total`-th reading should emit a throughput line.
    pub fn rate_log_due(&self, total: u64) -> bool {
        !self.config.quiet && total > 0 && total % self.config.log_interval() == 0
    }

    /// Time since the first reading, zero if none arrived yet.
    pub fn elapsed(&self) -> Duration {
        self.first_reading
            .get()
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    /// Stop the server and write benchmark metrics. Only the first caller
    /// does anything; returns whether this call was it.
    pub fn finalize_benchmark(&self) -> bool {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A signal already stopped the server; there is no benchmark to report.
        if !self.shutdown.trigger() {
            return false;
        }

        let seconds = self.elapsed().as_secs_f64();
        let total_readings = self.counters.total_readings();
        let report = BenchmarkReport {
            device_count: self.config.devices,
            thread_count: self.config.threads,
            benchmark_target: self.config.benchmark_readings,
            benchmark_sum_target: self.config.benchmark_sums,
            total_readings,
            total_sums: self.processor.total_sums(),
            seconds,
            throughput: throughput(total_readings, seconds),
            timestamp: Local::now(),
        };

        success!(
            "✅ Benchmark complete: {} readings, {} sums in {:.3}s ({:.2} readings/sec, {} workers)",
            report.total_readings,
            report.total_sums,
            report.seconds,
            report.throughput,
            self.worker_count
        );

        if let Some(path) = &self.config.metrics_file {
            info!("💾 Writing metrics to: {}", path.display());
            if let Err(e) = report.append_to(path) {
                error!("❌ Failed to write metrics file {}: {}", path.display(), e);
            }
        }

        true
    }

    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            total_readings: self.counters.total_readings(),
            total_sums: self.processor.total_sums(),
            anomalies: self.counters.anomalies(),
            failed_readings: self.counters.failed_readings(),
            connected_devices: self.counters.connected_devices(),
            elapsed: self.elapsed(),
        }
    }
}
