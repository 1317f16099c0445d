use std::sync::Arc;

use clap::Parser;
use fleet_control::{
    Hub, Vault,
    config::{Config, read_config_file},
    store::MemoryStore,
    transport::HttpAgentTransport,
};
use tracing::{debug, error, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the hex-encoded 32-byte vault key.
const VAULT_KEY_ENV: &str = "FLEET_VAULT_KEY";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("fleet_control", LevelFilter::TRACE),
        ("fleetd", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

/// Read and decode the vault key from the environment. Startup fails hard
/// on a missing or malformed key rather than running without encryption.
fn vault_from_env() -> anyhow::Result<Vault> {
    let hex_key = std::env::var(VAULT_KEY_ENV)
        .map_err(|_| anyhow::anyhow!("{VAULT_KEY_ENV} is not set"))?;
    let key = hex::decode(hex_key.trim())
        .map_err(|_| anyhow::anyhow!("{VAULT_KEY_ENV} is not valid hex"))?;

    Ok(Vault::new(&key)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    let vault = Arc::new(vault_from_env()?);
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(HttpAgentTransport::new());

    let hub = Hub::new(config, store, vault, transport);
    let handles = hub.start().await?;
    debug!("control plane started ({} background loops)", handles.len());

    tokio::signal::ctrl_c().await?;
    debug!("shutting down");

    for handle in handles {
        handle.abort();
        if let Err(e) = handle.await
            && !e.is_cancelled()
        {
            error!("background loop ended abnormally: {e}");
        }
    }

    Ok(())
}
