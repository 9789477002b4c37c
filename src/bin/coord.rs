//! Coordinator binary

use clap::{Parser, Subcommand};
use quorumlog::common::{open_log_file, ReplicaAddress};
use quorumlog::{Config, Coordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quorumlog-coord")]
#[command(about = "quorumlog coordinator: issues indices and replicates by quorum")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Also append logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Replica addresses host:port (comma-separated)
        #[arg(long, value_delimiter = ',')]
        replicas: Vec<String>,

        /// Admit writes even when a majority of nodes is down
        #[arg(long)]
        no_enforce_quorum: bool,

        /// Refuse writes that live replicas could not acknowledge
        #[arg(long)]
        suspend_on_replicas_dead: bool,

        /// Per-replica delivery deadline in milliseconds
        #[arg(long)]
        connection_timeout_ms: Option<u64>,

        /// Heartbeat interval in milliseconds
        #[arg(long)]
        heartbeat_interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            log_file,
            replicas,
            no_enforce_quorum,
            suspend_on_replicas_dead,
            connection_timeout_ms,
            heartbeat_interval_ms,
        } => {
            // file and environment first, CLI flags on top
            let mut file_config = Config::load(config.as_deref())?;
            if log_file.is_some() {
                file_config.log_file = log_file;
            }
            let file_layer = file_config
                .log_file
                .as_deref()
                .map(open_log_file)
                .transpose()?
                .map(|file| {
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file))
                });

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| file_config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .with(file_layer)
                .init();

            let mut coord_config = file_config.coordinator.unwrap_or_default();
            if let Some(bind) = bind {
                coord_config.bind_addr = bind.parse()?;
            }
            if !replicas.is_empty() {
                coord_config.replicas = replicas
                    .iter()
                    .map(|r| r.parse::<ReplicaAddress>())
                    .collect::<Result<_, _>>()?;
            }
            if no_enforce_quorum {
                coord_config.enforce_quorum = false;
            }
            if suspend_on_replicas_dead {
                coord_config.suspend_on_replicas_dead = true;
            }
            if let Some(ms) = connection_timeout_ms {
                coord_config.connection_timeout_ms = ms;
            }
            if let Some(ms) = heartbeat_interval_ms {
                coord_config.heartbeat_interval_ms = ms;
            }

            let node_id = id.unwrap_or(file_config.node_id);
            Coordinator::new(coord_config, node_id).serve().await?;
        }
    }

    Ok(())
}
