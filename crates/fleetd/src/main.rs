//! fleetd: the fleet control plane daemon.
//!
//! One binary for every control-plane role:
//! - `serve`: REST API (tenant + agent sync) and the leader-elected
//!   reconcilers
//! - `migrate`: apply or roll back state store schema migrations
//! - `dataplane sync`: register data-plane clusters from a TOML file
//!
//! # Usage
//!
//! ```text
//! fleetd migrate --data-dir /var/lib/fleet
//! fleetd serve --config /etc/fleet/fleet.toml --bind 0.0.0.0:8000
//! fleetd dataplane sync --file clusters.toml
//! ```

mod dataplane;
mod serve;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;
use fleet_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet control plane daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, env = "FLEET_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and the reconcilers.
    Serve {
        #[command(flatten)]
        config: ConfigArgs,

        /// Address to listen on; overrides `server.bind`.
        #[arg(long, env = "FLEET_BIND")]
        bind: Option<SocketAddr>,
    },

    /// Apply (default) or roll back state store migrations.
    Migrate {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(subcommand)]
        direction: Option<MigrateDirection>,
    },

    /// Manage data-plane cluster registrations.
    Dataplane {
        #[command(subcommand)]
        command: DataplaneCommand,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum MigrateDirection {
    /// Apply every pending migration.
    Up,
    /// Roll back the latest migration.
    Down,
}

#[derive(Subcommand)]
enum DataplaneCommand {
    /// Upsert the clusters listed in a TOML file.
    Sync {
        #[command(flatten)]
        config: ConfigArgs,

        /// Cluster definitions.
        #[arg(long, env = "FLEET_DATAPLANE_FILE")]
        file: PathBuf,
    },
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to fleet.toml; defaults apply when omitted.
    #[arg(long, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory; overrides `store.data_dir`.
    #[arg(long, env = "FLEET_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<FleetConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let config = FleetConfig::from_file(path)?;
                info!(?path, "configuration loaded");
                config
            }
            None => FleetConfig::default(),
        };
        if let Some(data_dir) = &self.data_dir {
            config.store.data_dir = data_dir.clone();
        }
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Open the on-disk store, creating the data directory on first use.
fn open_store(config: &FleetConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.store.data_dir)?;
    let path = config.store.db_path();
    let store = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve { config, bind } => {
            let mut config = config.load()?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;
            serve::run(config).await
        }
        Command::Migrate { config, direction } => {
            let config = config.load()?;
            let store = open_store(&config)?;
            match direction.unwrap_or(MigrateDirection::Up) {
                MigrateDirection::Up => {
                    let applied = store.migrate()?;
                    info!(?applied, version = store.schema_version()?, "store migrated");
                }
                MigrateDirection::Down => match store.rollback_last()? {
                    Some(version) => info!(version, "migration rolled back"),
                    None => info!("nothing to roll back"),
                },
            }
            Ok(())
        }
        Command::Dataplane {
            command: DataplaneCommand::Sync { config, file },
        } => {
            let config = config.load()?;
            let store = open_store(&config)?;
            store.ensure_schema_current()?;
            let clusters = dataplane::load_file(&file)?;
            let synced = dataplane::sync(&store, &clusters, chrono::Utc::now())?;
            info!(synced, file = ?file, "data-plane clusters synced");
            Ok(())
        }
    }
}
