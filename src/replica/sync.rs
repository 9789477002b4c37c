//! Replica-side log reconciliation
//!
//! A replica sends its whole log to the coordinator and installs the
//! coordinator-biased merge it gets back. This runs before the replica
//! serves, again whenever the coordinator contradicts the local log, and
//! whenever a gap in the local log outlives one check interval.

use crate::common::{Result, SharedLog};
use crate::coordinator::CoordinatorClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct SyncReconciler {
    client: CoordinatorClient,
    log: SharedLog,
    retry: Duration,
}

impl SyncReconciler {
    pub fn new(client: CoordinatorClient, log: SharedLog, retry: Duration) -> Self {
        Self { client, log, retry }
    }

    /// One exchange with the coordinator. Returns the size of the merged log.
    pub async fn sync_once(&self) -> Result<usize> {
        let reply = self.client.sync(self.log.to_map()).await?;
        let size = reply.log.len();
        self.log.adopt(reply.log, &reply.retired);
        Ok(size)
    }

    /// Retry with a fixed delay until one exchange succeeds. Returns false
    /// only if `cancel` fired first.
    pub async fn run(&self, cancel: &CancellationToken) -> bool {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return false,
                result = self.sync_once() => result,
            };
            match result {
                Ok(size) => {
                    tracing::info!(entries = size, attempt, "Log synced with coordinator");
                    return true;
                }
                Err(e) if e.is_connect() => {
                    tracing::warn!(
                        attempt,
                        "Couldn't connect to coordinator {}: {}",
                        self.client.base_url(),
                        e
                    )
                }
                Err(e) => tracing::warn!(attempt, "Log sync failed: {}", e),
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.retry) => {}
            }
        }
    }

    /// Re-sync on demand, or when the log stays non-contiguous for a full
    /// check interval.
    pub async fn watch(
        self: Arc<Self>,
        interval: Duration,
        trigger: Arc<Notify>,
        cancel: CancellationToken,
    ) {
        let mut gap_seen = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = trigger.notified() => {
                    tracing::info!("Sync requested");
                    gap_seen = false;
                    if !self.run(&cancel).await {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    if self.log.is_contiguous() {
                        gap_seen = false;
                    } else if gap_seen {
                        tracing::warn!("Log still has gaps; syncing");
                        gap_seen = false;
                        if !self.run(&cancel).await {
                            break;
                        }
                    } else {
                        gap_seen = true;
                    }
                }
            }
        }
        tracing::debug!("Sync watcher stopped");
    }
}
