//! Periodic root publishing
//!
//! Each tick compares the current root with the last confirmed one and, when
//! they differ, writes the root to the factory. At most one submission is in
//! flight at any time; overlapping ticks are skipped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use alloy_primitives::B256;
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{chain::ChainClient, controller::IndexerController};

/// Why a tick did nothing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Another submission is still running
    InFlight,
    /// No markets yet
    EmptyTree,
    /// Current root is already the last published one
    UpToDate,
}

/// Result of one publish tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to do
    Skipped(SkipReason),
    /// The factory already stores the current root
    AlreadyOnChain {
        /// Current root
        root: B256,
    },
    /// Root update confirmed
    Published {
        /// Published root
        root: B256,
        /// Update transaction
        tx_hash: B256,
        /// Leaves covered by the root
        leaf_count: usize,
    },
    /// Submission failed; the next tick retries
    Failed {
        /// Root that was attempted
        root: B256,
        /// Failure reason
        error: String,
    },
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Publishes the registry root to the factory
#[derive(Debug)]
pub struct RootPublisher {
    controller: IndexerController,
    client: Arc<dyn ChainClient>,
    in_flight: AtomicBool,
}

impl RootPublisher {
    /// Create a publisher
    pub const fn new(controller: IndexerController, client: Arc<dyn ChainClient>) -> Self {
        Self { controller, client, in_flight: AtomicBool::new(false) }
    }

    /// Publish the current root if it changed since the last confirmation
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("Previous publish still in flight, skipping tick");
            return TickOutcome::Skipped(SkipReason::InFlight);
        };

        let candidate = self.controller.publish_candidate().await;
        if candidate.leaf_count == 0 {
            debug!("No markets yet, nothing to publish");
            return TickOutcome::Skipped(SkipReason::EmptyTree);
        }
        if candidate.last_published_root == Some(candidate.root) {
            debug!(root = %candidate.root, "Root unchanged since last publish");
            return TickOutcome::Skipped(SkipReason::UpToDate);
        }

        match self.client.published_root().await {
            Ok(onchain) if onchain == candidate.root => {
                info!(root = %candidate.root, "Factory already stores the current root");
                if let Err(e) = self.controller.record_publish_success(&candidate).await {
                    error!(error = %e, "Failed to record published root");
                }
                return TickOutcome::AlreadyOnChain { root: candidate.root };
            }
            Ok(onchain) => debug!(%onchain, "On-chain root is stale"),
            Err(e) => warn!(error = %e, "Could not read on-chain root, submitting anyway"),
        }

        info!(root = %candidate.root, leaves = candidate.leaf_count, "Publishing registry root");
        match self.client.submit_root(candidate.root).await {
            Ok(tx_hash) => {
                match self.controller.record_publish_success(&candidate).await {
                    Ok(marked) => info!(root = %candidate.root, %tx_hash, marked, "Registry root published"),
                    Err(e) => error!(%tx_hash, error = %e, "Root published but ledger update failed"),
                }
                TickOutcome::Published {
                    root: candidate.root,
                    tx_hash,
                    leaf_count: candidate.leaf_count,
                }
            }
            Err(e) => {
                let error = e.to_string();
                warn!(root = %candidate.root, transient = e.is_transient(), %error, "Root publish failed");
                if let Err(e) = self.controller.record_publish_failure(candidate.root, &error).await {
                    error!(error = %e, "Failed to record publish failure");
                }
                TickOutcome::Failed { root: candidate.root, error }
            }
        }
    }

    /// Tick every `period`, starting immediately, until `shutdown` flips.
    ///
    /// A submission still running at shutdown is abandoned; its confirmation is
    /// picked up by the on-chain root check on the next start.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?period, "Root publisher started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Abandoning in-flight publish on shutdown");
                    break;
                }
                outcome = self.tick() => debug!(?outcome, "Publish tick finished"),
            }
        }
        info!("Root publisher stopped");
    }
}
