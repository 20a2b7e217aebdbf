//! # Server Components
//!
//! - [`server`]: listening socket, accept loop, dispatch
//! - [`handler`]: per-connection frame state machine
//! - [`pipeline`]: shared reading pipeline and benchmark finalize
//! - [`aggregator`]: windowed power sums
//! - [`pool`]: blocking worker threads
//! - [`metrics`]: counters and the benchmark CSV
//! - [`shutdown`]: cancellation handle
//! - [`config`]: server settings

pub mod aggregator;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod server;
pub mod shutdown;

pub use aggregator::PowerSumProcessor;
pub use config::ServerConfig;
pub use metrics::ServerCounters;
pub use pipeline::{ServerCore, ServerSummary};
pub use pool::WorkerPool;
pub use server::Server;
pub use shutdown::ShutdownHandle;
