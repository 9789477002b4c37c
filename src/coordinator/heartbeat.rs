//! Replica failure detection
//!
//! One probe loop per replica. A single missed probe only makes a replica
//! suspected; a second consecutive miss makes it unhealthy, and it stays
//! unhealthy until a probe succeeds again.

use crate::common::protocol::validate_ack;
use crate::common::protocol::ACK_IS_ALIVE;
use crate::common::{MetricsRegistry, ReplicaAddress, ReplicaChannel};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Liveness classification of one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaHealth {
    Healthy,
    Suspected,
    Unhealthy,
}

impl ReplicaHealth {
    /// State after a probe that did (`ok`) or did not succeed
    pub fn next(self, ok: bool) -> Self {
        match (self, ok) {
            (_, true) => ReplicaHealth::Healthy,
            (ReplicaHealth::Healthy, false) => ReplicaHealth::Suspected,
            (ReplicaHealth::Suspected | ReplicaHealth::Unhealthy, false) => {
                ReplicaHealth::Unhealthy
            }
        }
    }

    /// Healthy and suspected replicas both count as alive for admission.
    pub fn is_alive(self) -> bool {
        !matches!(self, ReplicaHealth::Unhealthy)
    }
}

impl std::fmt::Display for ReplicaHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaHealth::Healthy => write!(f, "healthy"),
            ReplicaHealth::Suspected => write!(f, "suspected"),
            ReplicaHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub health: ReplicaHealth,
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            health: ReplicaHealth::Healthy,
            consecutive_failures: 0,
            last_probe_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub alive: usize,
    pub dead: usize,
}

/// Current health of every configured replica. Every replica starts out
/// healthy.
#[derive(Clone, Default)]
pub struct HealthTable {
    inner: Arc<RwLock<BTreeMap<ReplicaAddress, HealthRecord>>>,
}

impl HealthTable {
    pub fn new(replicas: &[ReplicaAddress]) -> Self {
        let records = replicas
            .iter()
            .map(|r| (r.clone(), HealthRecord::default()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(records)),
        }
    }

    pub fn get(&self, replica: &ReplicaAddress) -> Option<ReplicaHealth> {
        self.inner.read().get(replica).map(|r| r.health)
    }

    /// Apply one probe result and return (previous, current) health.
    pub fn record_probe(
        &self,
        replica: &ReplicaAddress,
        ok: bool,
    ) -> (ReplicaHealth, ReplicaHealth) {
        let mut table = self.inner.write();
        let record = table.entry(replica.clone()).or_default();
        let previous = record.health;
        record.health = previous.next(ok);
        record.consecutive_failures = if ok {
            0
        } else {
            record.consecutive_failures.saturating_add(1)
        };
        record.last_probe_at = Some(Utc::now());
        (previous, record.health)
    }

    pub fn counts(&self) -> HealthCounts {
        let table = self.inner.read();
        let alive = table.values().filter(|r| r.health.is_alive()).count();
        HealthCounts {
            alive,
            dead: table.len() - alive,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<ReplicaAddress, HealthRecord> {
        self.inner.read().clone()
    }
}

pub struct HeartbeatMonitor {
    channel: Arc<dyn ReplicaChannel>,
    table: HealthTable,
    interval: Duration,
    probe_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl HeartbeatMonitor {
    pub fn new(
        channel: Arc<dyn ReplicaChannel>,
        table: HealthTable,
        interval: Duration,
        probe_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        metrics.replicas_alive.set(table.counts().alive as u64);
        Self {
            channel,
            table,
            interval,
            probe_timeout,
            metrics,
        }
    }

    pub fn table(&self) -> &HealthTable {
        &self.table
    }

    /// Probe one replica once and fold the result into the table.
    pub async fn probe_once(&self, replica: &ReplicaAddress) -> ReplicaHealth {
        let result = tokio::time::timeout(self.probe_timeout, self.channel.probe(replica)).await;
        let ok = match result {
            Ok(Ok(ack)) => match validate_ack(ACK_IS_ALIVE, &ack) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(replica = %replica, "Bad probe reply: {}", e);
                    false
                }
            },
            Ok(Err(e)) => {
                tracing::debug!(replica = %replica, "Probe failed: {}", e);
                false
            }
            Err(_) => {
                tracing::debug!(
                    replica = %replica,
                    "Probe timed out after {:?}",
                    self.probe_timeout
                );
                false
            }
        };

        if ok {
            self.metrics.probes_ok.inc();
        } else {
            self.metrics.probes_failed.inc();
        }

        let (previous, current) = self.table.record_probe(replica, ok);
        if previous != current {
            match current {
                ReplicaHealth::Healthy => {
                    tracing::info!(
                        replica = %replica,
                        "Replica is healthy again ({} -> {})",
                        previous,
                        current
                    )
                }
                ReplicaHealth::Suspected => {
                    tracing::warn!(replica = %replica, "Replica missed a probe; suspected")
                }
                ReplicaHealth::Unhealthy => {
                    tracing::error!(replica = %replica, "Replica is unhealthy")
                }
            }
            self.metrics
                .replicas_alive
                .set(self.table.counts().alive as u64);
        }
        current
    }

    async fn probe_loop(self: Arc<Self>, replica: ReplicaAddress, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.probe_once(&replica) => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::debug!(replica = %replica, "Heartbeat stopped");
    }

    /// Start one probe loop per replica; all stop when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let replicas: Vec<ReplicaAddress> = self.table.snapshot().into_keys().collect();
        let loops: Vec<_> = replicas
            .into_iter()
            .map(|replica| tokio::spawn(self.clone().probe_loop(replica, cancel.clone())))
            .collect();
        tokio::spawn(async move {
            futures_util::future::join_all(loops).await;
        })
    }
}
