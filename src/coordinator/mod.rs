//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Issuing log indices (it is the only node that does)
//! - Admitting writes against replica health
//! - Fanning writes out to replicas and deciding them by quorum
//! - Probing replica liveness
//! - Answering replica log syncs

pub mod client;
pub mod heartbeat;
pub mod http;
pub mod server;
pub mod transport;
pub mod writer;

pub use client::CoordinatorClient;
pub use heartbeat::{HealthTable, HeartbeatMonitor, ReplicaHealth};
pub use server::Coordinator;
pub use transport::{Delivery, ReplicaTransport};
pub use writer::{AdmissionPolicy, WriteCoordinator, WriteReceipt};
