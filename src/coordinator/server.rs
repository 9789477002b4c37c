//! Coordinator server

use crate::common::{CoordinatorConfig, HttpReplicaChannel, MetricsRegistry, Result, SharedLog};
use crate::coordinator::heartbeat::{HealthTable, HeartbeatMonitor};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::transport::ReplicaTransport;
use crate::coordinator::writer::{AdmissionPolicy, WriteCoordinator};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
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

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Replicas: {}", self.config.replicas.len());
        for replica in &self.config.replicas {
            tracing::info!("    - {}", replica);
        }
        tracing::info!(
            "  Admission: enforce_quorum={}, suspend_on_replicas_dead={}",
            self.config.enforce_quorum,
            self.config.suspend_on_replicas_dead
        );

        let metrics = Arc::new(MetricsRegistry::new());
        let policy = self.config.retry_policy();
        let channel = Arc::new(HttpReplicaChannel::new(
            policy.ack_timeout,
            self.config.probe_timeout(),
        )?);

        let health = HealthTable::new(&self.config.replicas);
        let monitor = Arc::new(HeartbeatMonitor::new(
            channel.clone(),
            health.clone(),
            self.config.heartbeat_interval(),
            self.config.probe_timeout(),
            metrics.clone(),
        ));
        let heartbeat = monitor.spawn(shutdown.child_token());

        let log = SharedLog::new();
        let transport = Arc::new(ReplicaTransport::new(channel, policy, metrics.clone()));
        let writer = Arc::new(WriteCoordinator::new(
            log.clone(),
            self.config.replicas.clone(),
            health.clone(),
            transport,
            AdmissionPolicy {
                enforce_quorum: self.config.enforce_quorum,
                suspend_on_replicas_dead: self.config.suspend_on_replicas_dead,
            },
            self.config.write_timeout(),
            self.config.grace_period(),
            metrics.clone(),
        ));

        let router = create_router(CoordState {
            writer,
            log,
            health,
            metrics,
        });

        tracing::info!("✓ Coordinator ready");

        let signal = shutdown.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;

        shutdown.cancel();
        if let Err(e) = heartbeat.await {
            tracing::warn!("Heartbeat task ended abnormally: {}", e);
        }
        tracing::info!("Coordinator stopped");

        result.map_err(Into::into)
    }
}
