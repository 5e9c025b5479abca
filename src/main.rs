use relayd::config::MoarConfig;
use relayd::gateway::{start_gateway, RelayBundle};
use relayd::policy::PolicyEngine;
use relayd::stats::{stats_background_loop, RelayStats, SharedSystemStats, SystemStats, TimeSeriesRing};
use relayd::storage::lmdb::LmdbStore;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(name = "moar")]
#[command(about = "Mother Of All Relays", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay(s)
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "moar.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config: config_path } => {
            let config_content = std::fs::read_to_string(&config_path)?;
            let config: MoarConfig = toml::from_str(&config_content)?;

            let mut relays = std::collections::HashMap::new();
            let mut background_stats = Vec::new();

            for (key, relay_conf) in config.relays.clone() {
                let store: Arc<dyn relayd::storage::NostrStore> =
                    Arc::new(LmdbStore::new(&relay_conf.db_path)?);
                let policy = Arc::new(PolicyEngine::new(relay_conf.policy.clone()));
                let stats = Arc::new(RelayStats::new());
                let ring = Arc::new(RwLock::new(TimeSeriesRing::new()));

                background_stats.push((
                    key.clone(),
                    stats.clone(),
                    ring,
                    store.clone(),
                    relay_conf.db_path.clone(),
                ));

                relays.insert(
                    key,
                    RelayBundle {
                        config: relay_conf,
                        store,
                        policy,
                        stats,
                    },
                );
            }

            let system_stats: SharedSystemStats = Arc::new(RwLock::new(SystemStats::default()));
            tokio::spawn(stats_background_loop(background_stats, system_stats));

            start_gateway(config.port, config.domain.clone(), relays, config, config_path).await?;
        }
    }

    Ok(())
}
