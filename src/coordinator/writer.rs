//! Write coordination
//!
//! A client write is admitted against current replica health, applied to
//! the coordinator's own log, fanned out to every replica and answered once
//! its quorum latch decides. The coordinator counts as one acknowledgment,
//! so a write with `w` required acknowledgments needs `w - 1` replicas.

use crate::common::protocol::SyncMessage;
use crate::common::{
    reconcile, Error, LogEntry, MetricsRegistry, Outcome, QuorumLatch, ReplicaAddress, Result,
    SharedLog, WriteOp,
};
use crate::coordinator::heartbeat::HealthTable;
use crate::coordinator::transport::ReplicaTransport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Admission switches
#[derive(Debug, Clone, Copy)]
pub struct AdmissionPolicy {
    /// Refuse writes while fewer than a majority of nodes are alive
    pub enforce_quorum: bool,
    /// Refuse writes that could not collect `w - 1` replica acks from live replicas
    pub suspend_on_replicas_dead: bool,
}

/// Result of an accepted write
#[derive(Debug, Clone, Serialize)]
pub struct WriteReceipt {
    pub index: u64,
    pub acked: usize,
    pub failed: usize,
}

/// Node count a write needs alive to be admitted: `(1 + replicas) / 2`,
/// counting the coordinator.
pub fn quorum_number(replicas: usize) -> usize {
    (1 + replicas) / 2
}

pub struct WriteCoordinator {
    log: SharedLog,
    replicas: Vec<ReplicaAddress>,
    health: HealthTable,
    transport: Arc<ReplicaTransport>,
    policy: AdmissionPolicy,
    write_timeout: Duration,
    grace_period: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl WriteCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: SharedLog,
        replicas: Vec<ReplicaAddress>,
        health: HealthTable,
        transport: Arc<ReplicaTransport>,
        policy: AdmissionPolicy,
        write_timeout: Duration,
        grace_period: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            log,
            replicas,
            health,
            transport,
            policy,
            write_timeout,
            grace_period,
            metrics,
        }
    }

    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    pub fn replicas(&self) -> &[ReplicaAddress] {
        &self.replicas
    }

    /// Validate a client-supplied `w` and return it as a count.
    pub fn required_acks(&self, w: Option<i64>) -> Result<usize> {
        let w = w.ok_or_else(|| {
            Error::InvalidRequest("number of required acknowledgments (w) is missing".into())
        })?;
        let max = self.replicas.len() + 1;
        if w < 1 || w as u64 > max as u64 {
            return Err(Error::InvalidRequest(format!(
                "w must be between 1 and {} (coordinator plus {} replicas), got {}",
                max,
                self.replicas.len(),
                w
            )));
        }
        Ok(w as usize)
    }

    /// Decide from current health whether a write needing `required_acks`
    /// acknowledgments may start.
    pub fn admit(&self, required_acks: usize) -> Result<()> {
        let alive = self.health.counts().alive;

        if self.policy.enforce_quorum {
            let quorum = quorum_number(self.replicas.len());
            if alive + 1 < quorum {
                return Err(Error::AdmissionRejected(format!(
                    "{} of {} replicas alive, quorum of {} nodes unreachable",
                    alive,
                    self.replicas.len(),
                    quorum
                )));
            }
        }

        if self.policy.suspend_on_replicas_dead && alive < required_acks.saturating_sub(1) {
            return Err(Error::AdmissionRejected(format!(
                "{} replicas alive, write needs {} replica acknowledgments",
                alive,
                required_acks - 1
            )));
        }

        Ok(())
    }

    /// Append `payload` at the next index and replicate it.
    pub async fn handle_write(&self, payload: &str, w: Option<i64>) -> Result<WriteReceipt> {
        let required_acks = self.required_acks(w)?;
        if let Err(e) = self.admit(required_acks) {
            self.metrics.writes_not_admitted.inc();
            tracing::warn!("Write refused: {}", e);
            return Err(e);
        }

        let entry = self.log.append_next(payload);
        tracing::info!(
            index = entry.index,
            w = required_acks,
            "Appended locally; replicating"
        );
        self.replicate(WriteOp::Append, entry, required_acks).await
    }

    /// Delete a live index locally and replicate the deletion.
    pub async fn handle_delete(&self, index: u64, w: Option<i64>) -> Result<WriteReceipt> {
        let required_acks = self.required_acks(w)?;
        if self.log.get(index).is_none() {
            return Err(Error::NotFound(index));
        }
        if let Err(e) = self.admit(required_acks) {
            self.metrics.writes_not_admitted.inc();
            tracing::warn!("Delete refused: {}", e);
            return Err(e);
        }

        // a concurrent delete of the same index may have won since the check
        let payload = self.log.retire_live(index).ok_or(Error::NotFound(index))?;
        tracing::info!(index, w = required_acks, "Deleted locally; replicating");
        self.replicate(WriteOp::Delete, LogEntry::new(index, payload), required_acks)
            .await
    }

    async fn replicate(
        &self,
        op: WriteOp,
        entry: LogEntry,
        required_acks: usize,
    ) -> Result<WriteReceipt> {
        let start = Instant::now();
        let required_successes = required_acks - 1;
        let latch = Arc::new(QuorumLatch::with_quorum(
            required_successes,
            self.replicas.len(),
        ));
        let cancel = CancellationToken::new();

        // deliveries keep running after the outcome is decided
        for replica in &self.replicas {
            let transport = self.transport.clone();
            let replica = replica.clone();
            let entry = entry.clone();
            let latch = latch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                transport
                    .deliver(&replica, op, &entry, &latch, &cancel)
                    .await;
            });
        }

        let outcome = if required_successes == 0 {
            tokio::time::sleep(self.grace_period).await;
            latch.outcome()
        } else {
            latch.await_outcome(self.write_timeout).await
        };
        if outcome == Outcome::Pending {
            tracing::warn!(
                index = entry.index,
                "No quorum decision within {:?}",
                self.write_timeout
            );
            cancel.cancel();
        }

        self.metrics
            .write_latency
            .observe(start.elapsed().as_secs_f64() * 1000.0);

        let state = latch.state();
        match outcome {
            Outcome::Succeeded => {
                self.metrics.writes_accepted.inc();
                tracing::info!(
                    index = entry.index,
                    acked = state.successes,
                    "{} accepted",
                    op
                );
                Ok(WriteReceipt {
                    index: entry.index,
                    acked: state.successes,
                    failed: state.failures,
                })
            }
            Outcome::Failed | Outcome::Pending => {
                self.metrics.writes_rejected.inc();
                tracing::error!(
                    index = entry.index,
                    acked = state.successes,
                    failed = state.failures,
                    "{} rejected: quorum not reached",
                    op
                );
                Err(Error::QuorumFailed {
                    needed: required_successes,
                    acked: state.successes,
                    failed: state.failures,
                })
            }
        }
    }

    /// Merge a replica's log into the coordinator's view.
    ///
    /// The coordinator's own log is left untouched; only the reply carries
    /// the merge, along with every index the coordinator has deleted.
    pub fn serve_sync(&self, replica_log: BTreeMap<u64, String>) -> SyncMessage {
        self.metrics.syncs_served.inc();
        let (log, retired) = self.log.sync_view();
        let merged = reconcile(&log, &retired, replica_log);
        tracing::info!(
            entries = merged.len(),
            retired = retired.len(),
            "Served log sync"
        );
        SyncMessage {
            log: merged,
            retired,
        }
    }
}
