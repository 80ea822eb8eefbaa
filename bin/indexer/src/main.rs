//! Market registry indexer binary

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use predmarket_indexer::{Config, IndexerService};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔═══════════════════════════════════════════════╗");
    info!("║          Market Registry Indexer              ║");
    info!("╚═══════════════════════════════════════════════╝");

    let config = Config::from_env()?;

    info!("");
    info!("Configuration:");
    info!("  RPC:              {}", config.rpc_url);
    info!("  Factory:          {}", config.factory_address);
    match config.signer_address {
        Some(signer) => info!("  Signer:           {}", signer),
        None => info!("  Signer:           none (publishing disabled)"),
    }
    info!("  Publish interval: {:?}", config.publish_interval);
    info!("  Confirmations:    {}", config.confirmation_depth);
    info!("  Start block:      {}", config.start_block);
    info!("  Ledger:           {}", config.ledger_path.display());
    info!("  Query API:        {}", config.http_addr);
    info!("");

    IndexerService::new(config)
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
