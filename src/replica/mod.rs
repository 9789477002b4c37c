//! Replica implementation
//!
//! A replica holds a copy of the coordinator's log. It applies appends and
//! deletes in whatever order they arrive, answers liveness probes, and
//! repairs its log from the coordinator on startup and on divergence.

pub mod http;
pub mod server;
pub mod sync;

pub use server::ReplicaServer;
pub use sync::SyncReconciler;
