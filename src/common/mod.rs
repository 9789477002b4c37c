//! Common utilities and types shared across quorumlog

pub mod config;
pub mod error;
pub mod latch;
pub mod log;
pub mod metrics;
pub mod protocol;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinatorConfig, ReplicaConfig, RetryPolicy};
pub use error::{Error, Result};
pub use latch::{LatchState, Outcome, QuorumLatch};
pub use log::{reconcile, AppendOutcome, LogEntry, ReplicatedLog, SharedLog};
pub use metrics::MetricsRegistry;
pub use protocol::{HttpReplicaChannel, ReplicaChannel, WriteOp};
pub use utils::{backoff_delay, open_log_file, parse_duration, ReplicaAddress};
