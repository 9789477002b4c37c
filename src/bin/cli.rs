//! CLI for talking to a coordinator

use clap::{Parser, Subcommand};
use quorumlog::common::parse_duration;
use quorumlog::coordinator::CoordinatorClient;

#[derive(Parser)]
#[command(name = "quorumlog")]
#[command(about = "quorumlog replicated log CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:5000")]
    coordinator: String,

    /// Request timeout (e.g. "500ms", "30s", "2m")
    #[arg(long, default_value = "60s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a message
    Append {
        /// Message text
        msg: String,

        /// Required acknowledgments, counting the coordinator
        #[arg(long)]
        w: i64,
    },

    /// Delete a message by index
    Delete {
        /// Log index
        index: u64,

        /// Required acknowledgments, counting the coordinator
        #[arg(long)]
        w: i64,
    },

    /// List stored messages
    List,

    /// Show replica health and quorum status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = CoordinatorClient::new(&cli.coordinator, parse_duration(&cli.timeout)?)?;

    match cli.command {
        Commands::Append { msg, w } => {
            let response = client.append(&msg, w).await?;
            if response.is_accepted() {
                println!(
                    "✓ Appended at index {} ({} replica acks)",
                    response.index.unwrap_or_default(),
                    response.acked.unwrap_or_default()
                );
            } else {
                anyhow::bail!(
                    "write rejected: {}",
                    response.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }
        Commands::Delete { index, w } => {
            let response = client.delete(index, w).await?;
            if response.is_accepted() {
                println!("✓ Deleted index {}", index);
            } else {
                anyhow::bail!(
                    "delete rejected: {}",
                    response.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }
        Commands::List => {
            for line in client.list().await? {
                println!("{}", line);
            }
        }
        Commands::Status => {
            let health = client.health().await?;
            println!("coordinator {} (client {})", client.base_url(), quorumlog::BUILD_INFO);
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    Ok(())
}
