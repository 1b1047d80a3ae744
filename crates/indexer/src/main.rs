//! tzmirror indexer daemon.
//!
//! Loads the TOML configuration, opens the mirror database, and runs
//! the head-follow sync loop until a fatal error or Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use snafu::{ResultExt, Snafu};
use tokio::runtime::Handle;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tzmirror_engine::{BootstrapAccount, BootstrapParams, Dispatcher, EngineContext, IndexError};
use tzmirror_storage::{EngineError, StorageEngine};
use tzmirror_types::config::{ConfigError, IndexerConfig, LogFormat};

use crate::rpc::{NodeClient, NodeRpc, RightsBridge, RpcError};
use crate::sync::{SyncError, SyncLoop};

mod rpc;
mod sync;

/// Blockchain mirror indexer.
#[derive(Debug, Parser)]
#[command(name = "tzmirrord", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "TZMIRROR_CONFIG", default_value = "tzmirror.toml")]
    config: PathBuf,
}

#[derive(Debug, Snafu)]
enum MainError {
    #[snafu(display("failed to read config {path}: {source}"))]
    ReadConfig { path: String, source: std::io::Error },

    #[snafu(display("failed to parse config {path}: {source}"))]
    ParseConfig { path: String, source: toml::de::Error },

    #[snafu(display("{source}"))]
    InvalidConfig { source: ConfigError },

    #[snafu(display("failed to create data dir {path}: {source}"))]
    DataDir { path: String, source: std::io::Error },

    #[snafu(display("failed to open database: {source}"))]
    OpenDatabase { source: EngineError },

    #[snafu(display("failed to open engine: {source}"))]
    OpenEngine { source: IndexError },

    #[snafu(display("failed to build node client: {source}"))]
    NodeClient { source: RpcError },

    #[snafu(display("sync loop failed: {source}"))]
    Sync { source: SyncError },
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().flatten_event(true).with_current_span(false))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .init();
        }
    }
}

fn load_config(path: &PathBuf) -> Result<IndexerConfig, MainError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).context(ReadConfigSnafu { path: display.clone() })?;
    let config: IndexerConfig =
        toml::from_str(&raw).context(ParseConfigSnafu { path: display })?;
    config.validate().context(InvalidConfigSnafu)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(config.log_format);

    std::fs::create_dir_all(&config.data_dir).context(DataDirSnafu {
        path: config.data_dir.display().to_string(),
    })?;
    let store = StorageEngine::open(config.data_dir.join("mirror.redb"))
        .context(OpenDatabaseSnafu)?;

    let rpc: Arc<dyn NodeRpc> =
        Arc::new(NodeClient::new(&config.node).context(NodeClientSnafu)?);
    let bridge = RightsBridge::new(Arc::clone(&rpc), Handle::current());

    let mut engine = EngineContext::open(
        store,
        &config.cache,
        config.engine.clone(),
        Box::new(bridge),
    )
    .context(OpenEngineSnafu)?;
    if !config.bootstrap.is_empty() {
        engine.bootstrap = Some(BootstrapParams {
            accounts: config
                .bootstrap
                .iter()
                .map(|account| BootstrapAccount {
                    address: account.address.clone(),
                    balance: account.balance,
                    delegate: account.delegate,
                })
                .collect(),
        });
    }

    let dispatcher = Dispatcher::standard(&config.engine);
    info!(
        endpoint = config.node.endpoint,
        data_dir = %config.data_dir.display(),
        level = engine.chain.level,
        "tzmirrord starting"
    );

    SyncLoop::new(engine, dispatcher, rpc, config.node.poll_interval)
        .run()
        .await
        .context(SyncSnafu)
}
