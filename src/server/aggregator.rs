//! # Power Summation
//!
//! Readings from every connection land in one window. Each time the window
//! holds `sum_interval` values it is summed, logged and cleared. One mutex
//! covers append + flush, so exactly one caller closes each window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use log::{info, warn};

use crate::sum_result;

/// Invoked once when the configured number of sums has completed.
pub type CompletionCallback = Box<dyn Fn() + Send + Sync>;

/// A closed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSum {
    /// 1-based window number.
    pub index: u64,
    pub sum: f64,
    pub count: usize,
}

struct BenchmarkTarget {
    sums: u64,
    on_complete: CompletionCallback,
}

#[derive(Default)]
struct Window {
    readings: Vec<f64>,
    last: Option<WindowSum>,
}

pub struct PowerSumProcessor {
    sum_interval: usize,
    window: Mutex<Window>,
    total_sums: AtomicU64,
    benchmark: OnceLock<BenchmarkTarget>,
}

impl PowerSumProcessor {
    pub fn new(sum_interval: usize) -> Self {
        let sum_interval = sum_interval.max(1);
        info!(
            "PowerSumProcessor initialized - will sum every {} readings",
            sum_interval
        );
        Self {
            sum_interval,
            window: Mutex::new(Window {
                readings: Vec::with_capacity(sum_interval),
                last: None,
            }),
            total_sums: AtomicU64::new(0),
            benchmark: OnceLock::new(),
        }
    }

    /// Register the sum-count target. Only the first registration sticks.
    pub fn set_benchmark_target(&self, target_sums: u64, on_complete: CompletionCallback) {
        let target = BenchmarkTarget {
            sums: target_sums,
            on_complete,
        };
        if self.benchmark.set(target).is_err() {
            warn!("Benchmark target already set - ignoring {}", target_sums);
            return;
        }
        info!("Benchmark target set: {} power summations", target_sums);
    }

    /// Add one power value. Returns `true` if this call closed a window.
    pub fn add_reading(&self, power: f64) -> bool {
        let completed = {
            let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            window.readings.push(power);
            if window.readings.len() < self.sum_interval {
                return false;
            }

            let sum: f64 = window.readings.iter().sum();
            let index = self.total_sums.fetch_add(1, Ordering::AcqRel) + 1;
            let closed = WindowSum {
                index,
                sum,
                count: window.readings.len(),
            };
            window.readings.clear();
            window.last = Some(closed);

            sum_result!(
                "Sum {} of {} power readings: {:.2} WATTS",
                index,
                closed.count,
                sum
            );
            closed
        };

        // Outside the lock: the callback reads processor state.
        if let Some(target) = self.benchmark.get() {
            if target.sums > 0 && completed.index == target.sums {
                (target.on_complete)();
            }
        }

        true
    }

    pub fn total_sums(&self) -> u64 {
        self.total_sums.load(Ordering::Acquire)
    }

    pub fn sum_interval(&self) -> usize {
        self.sum_interval
    }

    /// Values waiting in the open window.
    pub fn pending(&self) -> usize {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .readings
            .len()
    }

    pub fn last_sum(&self) -> Option<WindowSum> {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
    }
}
