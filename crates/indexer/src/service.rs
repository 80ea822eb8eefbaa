//! Service wiring
//!
//! Restores the registry from the ledger, then runs the event source, the
//! ingestion loop, the publisher and the query API until shutdown.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tracing::{error, info, warn};

use crate::{
    chain::ChainClient,
    config::Config,
    controller::IndexerController,
    event_source::{ChainEventSource, EventSourceConfig},
    http,
    ledger::FileLedger,
    publisher::RootPublisher,
    query::ProofService,
    rpc::JsonRpcClient,
};

/// The full indexer process
#[derive(Debug)]
pub struct IndexerService {
    config: Config,
}

impl IndexerService {
    /// Create a service from configuration
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until `shutdown` resolves or ingestion fails
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let config = self.config;

        let ledger = FileLedger::open(&config.ledger_path)
            .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
        let controller = IndexerController::open(Box::new(ledger))?;
        let client: Arc<dyn ChainClient> =
            Arc::new(JsonRpcClient::new(&config).context("building RPC client")?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Ingestion
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let resume = controller.resume_block().await.unwrap_or_default();
        let source = ChainEventSource::new(Arc::clone(&client), EventSourceConfig::from(&config))
            .resume_from(resume);
        info!(from_block = source.next_block(), "Scanning MarketCreated events");
        let source = source.start(event_tx);
        let mut ingest = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.run(event_rx).await })
        };

        // Publishing
        let publisher = if config.publishing_enabled() {
            let publisher = RootPublisher::new(controller.clone(), Arc::clone(&client));
            let period = config.publish_interval;
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move { publisher.run(period, rx).await }))
        } else {
            warn!("SIGNER_ADDRESS not set, root publishing disabled");
            None
        };

        // Queries
        let listener = TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("binding {}", config.http_addr))?;
        info!(addr = %config.http_addr, "Query API listening");
        let app = http::router(ProofService::new(controller.reader()));
        let mut http_shutdown = shutdown_rx.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.changed().await;
                })
                .await
        });

        tokio::pin!(shutdown);
        let ingest_result = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                None
            }
            result = &mut ingest => Some(result),
        };

        source.stop().await;
        let _ = shutdown_tx.send(true);

        let ingest_result = match ingest_result {
            Some(result) => result,
            None => ingest.await,
        };
        if let Some(publisher) = publisher {
            if let Err(e) = publisher.await {
                error!(error = %e, "Publisher task failed");
            }
        }
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Query API failed"),
            Err(e) => error!(error = %e, "Query API task failed"),
        }

        let status = controller.reader().status().await;
        info!(leaves = status.leaf_count, root = ?status.root, "Indexer stopped");

        ingest_result.context("ingestion task panicked")?.context("ingestion halted")
    }
}
