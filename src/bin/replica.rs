//! Replica binary

use clap::{Parser, Subcommand};
use quorumlog::common::open_log_file;
use quorumlog::{Config, ReplicaServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quorumlog-replica")]
#[command(about = "quorumlog replica: holds a copy of the coordinator's log")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start replica server
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replica ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<String>,

        /// Also append logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Coordinator URL
        #[arg(long)]
        coordinator: Option<String>,

        /// Delay before acknowledging writes, in milliseconds
        #[arg(long)]
        ack_delay_ms: Option<u64>,
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
            coordinator,
            ack_delay_ms,
        } => {
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

            let mut replica_config = file_config.replica.unwrap_or_default();
            if let Some(bind) = bind {
                replica_config.bind_addr = bind.parse()?;
            }
            if let Some(url) = coordinator {
                replica_config.coordinator_url = url;
            }
            if let Some(ms) = ack_delay_ms {
                replica_config.ack_delay_ms = ms;
            }

            let replica_id = id.unwrap_or(file_config.node_id);
            ReplicaServer::new(replica_config, replica_id).serve().await?;
        }
    }

    Ok(())
}
