//! # quorumlog
//!
//! A primary-coordinated replicated message log with:
//! - A single coordinator that issues log indices
//! - Per-write quorum (`w`) counting the coordinator as one acknowledgment
//! - Retry with exponential backoff up to a per-delivery deadline
//! - Heartbeat failure detection gating write admission
//! - Coordinator-biased log sync for lagging replicas
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            clients (GET / , POST / {msg, w})
//!                        │
//!              ┌─────────▼──────────┐
//!              │    Coordinator     │
//!              │  log + admission   │
//!              │  quorum latch      │
//!              │  heartbeat probes  │
//!              └───┬──────┬──────┬──┘
//!      append/delete│      │      │ is_alive
//!            ┌─────▼┐  ┌──▼───┐ ┌▼─────┐
//!            │ R1   │  │ R2   │ │ R3   │
//!            └──────┘  └──────┘ └──────┘
//!              └─── POST /sync on startup and on gaps
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! quorumlog-coord serve \
//!   --bind 0.0.0.0:5000 \
//!   --replicas 127.0.0.1:6001,127.0.0.1:6002,127.0.0.1:6003
//! ```
//!
//! ### Start a replica
//! ```bash
//! quorumlog-replica serve \
//!   --id replica-1 \
//!   --bind 0.0.0.0:6001 \
//!   --coordinator http://localhost:5000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! quorumlog append "hello" --w 3
//! quorumlog delete 0 --w 2
//! quorumlog list
//! quorumlog status
//! ```

pub mod common;
pub mod coordinator;
pub mod replica;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use replica::ReplicaServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
