use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};

pub const CSV_HEADER: &str = "device_count,thread_count,benchmark_target,benchmark_sum_target,total_readings,total_sums,seconds,throughput_rps,timestamp";

/// Lock-free server counters. None of them depend on each other.
#[derive(Debug, Default)]
pub struct ServerCounters {
    total_readings: AtomicU64,
    connected_devices: AtomicU64,
    anomalies: AtomicU64,
    failed_readings: AtomicU64,
}

impl ServerCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one processed reading and return the new total.
    pub fn record_reading(&self) -> u64 {
        self.total_readings.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_readings(&self) -> u64 {
        self.total_readings.load(Ordering::Acquire)
    }

    pub fn connected_devices(&self) -> u64 {
        self.connected_devices.load(Ordering::Relaxed)
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub fn failed_readings(&self) -> u64 {
        self.failed_readings.load(Ordering::Relaxed)
    }
}

/// Tracks one open device connection; the count drops with the guard.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<ServerCounters>,
}

impl ConnectionGuard {
    pub fn open(counters: Arc<ServerCounters>) -> Self {
        counters.connected_devices.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters
            .connected_devices
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Readings per second, 0 when no time has elapsed.
pub fn throughput(readings: u64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        readings as f64 / seconds
    } else {
        0.0
    }
}

/// One row of the benchmark metrics CSV.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub device_count: usize,
    pub thread_count: usize,
    pub benchmark_target: u64,
    pub benchmark_sum_target: u64,
    pub total_readings: u64,
    pub total_sums: u64,
    pub seconds: f64,
    pub throughput: f64,
    pub timestamp: DateTime<Local>,
}

impl BenchmarkReport {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.6},{:.2},{}",
            self.device_count,
            self.thread_count,
            self.benchmark_target,
            self.benchmark_sum_target,
            self.total_readings,
            self.total_sums,
            self.seconds,
            self.throughput,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Append this row, writing the header first if the file is new or empty.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", CSV_HEADER)?;
        }
        writeln!(file, "{}", self.to_csv_row())?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(total_readings: u64) -> BenchmarkReport {
        BenchmarkReport {
            device_count: 100,
            thread_count: 8,
            benchmark_target: 0,
            benchmark_sum_target: 5,
            total_readings,
            total_sums: 5,
            seconds: 2.5,
            throughput: throughput(total_readings, 2.5),
            timestamp: Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(100, 4.0), 25.0);
        assert_eq!(throughput(100, 0.0), 0.0);
    }

    #[test]
    fn test_csv_row_format() {
        assert_eq!(
            report(10).to_csv_row(),
            "100,8,0,5,10,5,2.500000,4.00,2024-03-01 12:30:00"
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");

        report(10).append_to(&path).unwrap();
        report(20).append_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("100,8,0,5,10,"));
        assert!(lines[2].starts_with("100,8,0,5,20,"));
    }

    #[test]
    fn test_connection_guard_tracks_open_connections() {
        let counters = Arc::new(ServerCounters::new());
        let a = ConnectionGuard::open(Arc::clone(&counters));
        let b = ConnectionGuard::open(Arc::clone(&counters));
        assert_eq!(counters.connected_devices(), 2);
        drop(a);
        assert_eq!(counters.connected_devices(), 1);
        drop(b);
        assert_eq!(counters.connected_devices(), 0);
    }

    #[test]
    fn test_reading_total_is_monotonic() {
        let counters = ServerCounters::new();
        assert_eq!(counters.record_reading(), 1);
        assert_eq!(counters.record_reading(), 2);
        assert_eq!(counters.total_readings(), 2);
    }
}
