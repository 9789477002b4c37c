//! Replica server

use crate::common::{MetricsRegistry, ReplicaConfig, Result, SharedLog};
use crate::coordinator::CoordinatorClient;
use crate::replica::http::{create_router, ReplicaState};
use crate::replica::sync::SyncReconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Request timeout for one sync exchange
const SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReplicaServer {
    config: ReplicaConfig,
    replica_id: String,
}

impl ReplicaServer {
    pub fn new(config: ReplicaConfig, replica_id: String) -> Self {
        Self { config, replica_id }
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let shutdown = CancellationToken::new();
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("Shutdown signal received");
                        shutdown.cancel();
                    }
                    Err(e) => tracing::warn!("Couldn't listen for Ctrl-C: {}", e),
                }
            });
        }
        self.run(listener, shutdown).await
    }

    /// Sync with the coordinator, then serve on `listener` until `shutdown`
    /// fires.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting replica: {}", self.replica_id);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Coordinator: {}", self.config.coordinator_url);
        if !self.config.ack_delay().is_zero() {
            tracing::info!("  Ack delay: {:?}", self.config.ack_delay());
        }

        let log = SharedLog::new();
        let client = CoordinatorClient::new(&self.config.coordinator_url, SYNC_REQUEST_TIMEOUT)?;
        let reconciler = Arc::new(SyncReconciler::new(
            client,
            log.clone(),
            self.config.sync_retry(),
        ));

        // nothing is served until the first sync lands
        if !reconciler.run(&shutdown).await {
            tracing::info!("Replica stopped before first sync");
            return Ok(());
        }

        let sync_trigger = Arc::new(Notify::new());
        let watcher = tokio::spawn(reconciler.watch(
            self.config.gap_check_interval(),
            sync_trigger.clone(),
            shutdown.child_token(),
        ));

        let router = create_router(ReplicaState {
            log,
            ack_delay: self.config.ack_delay(),
            sync_trigger,
            metrics: Arc::new(MetricsRegistry::new()),
        });

        tracing::info!("✓ Replica ready");

        let signal = shutdown.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

        shutdown.cancel();
        if let Err(e) = watcher.await {
            tracing::warn!("Sync watcher ended abnormally: {}", e);
        }
        tracing::info!("Replica stopped");

        result.map_err(Into::into)
    }
}
