//! Indexer controller
//!
//! Owns the commitment tree and the ledger. All mutation goes through a single
//! write lock: each accepted market is made durable in the ledger before its
//! leaf enters the tree, so after a crash the tree can always be rebuilt from
//! the ledger alone.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use alloy_primitives::{Address, B256, U256};
use predmarket_bindings::MarketCreated;
use predmarket_merkle::{CommitmentTree, MarketLeaf};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::ledger::{LedgerEntry, LedgerError, LedgerStore, MemoryLedger};

/// Error restoring the controller from its ledger
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Ledger access failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Leaf indices in the ledger are not contiguous
    #[error("ledger leaf indices are not contiguous: expected {expected}, found {found}")]
    LeafGap {
        /// Next index the tree would assign
        expected: u64,
        /// Index recorded in the ledger
        found: u64,
    },
    /// The same leaf is recorded twice
    #[error("ledger records market {0} twice")]
    DuplicateLeaf(U256),
}

/// Result of ingesting one `MarketCreated` event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New leaf appended
    Appended {
        /// Position of the new leaf
        leaf_index: usize,
        /// Root after the append
        root: B256,
    },
    /// Same market seen before; nothing changed
    Duplicate,
    /// Market id already committed with another address; the event was rejected
    Conflict {
        /// Address kept in the registry
        recorded: Address,
    },
}

/// Snapshot the publisher works from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishCandidate {
    /// Current root
    pub root: B256,
    /// Leaves covered by `root`
    pub leaf_count: usize,
    /// Last root confirmed on-chain
    pub last_published_root: Option<B256>,
}

/// Outcome of the most recent publish attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAttempt {
    /// Unix seconds
    pub at: u64,
    /// Root that was submitted
    pub root: B256,
    /// Failure reason, `None` on success
    pub error: Option<String>,
}

/// Indexer state summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    /// Committed markets
    pub leaf_count: usize,
    /// Current root, `None` while empty
    pub root: Option<B256>,
    /// Last root confirmed on-chain
    pub last_published_root: Option<B256>,
    /// Markets not yet covered by a published root
    pub unpublished: usize,
    /// Highest block an event was ingested from
    pub last_block: Option<u64>,
    /// Most recent publish attempt in this process
    pub last_publish: Option<PublishAttempt>,
}

#[derive(Debug)]
struct IndexState {
    tree: CommitmentTree,
    ledger: Box<dyn LedgerStore>,
    last_published_root: Option<B256>,
    last_block: Option<u64>,
    last_publish: Option<PublishAttempt>,
}

/// Serializes ingestion and publish bookkeeping over the shared index
#[derive(Clone, Debug)]
pub struct IndexerController {
    state: Arc<RwLock<IndexState>>,
}

impl IndexerController {
    /// Restore from a ledger by replaying its entries in leaf order
    pub fn open(ledger: Box<dyn LedgerStore>) -> Result<Self, ControllerError> {
        let mut tree = CommitmentTree::new();
        let mut last_published_root = None;
        let mut last_block = None;

        for entry in ledger.entries() {
            let expected = tree.len() as u64;
            if entry.leaf_index != expected {
                return Err(ControllerError::LeafGap { expected, found: entry.leaf_index });
            }
            let leaf = entry.leaf().digest();
            if tree.position(&leaf).is_some() {
                return Err(ControllerError::DuplicateLeaf(entry.market_id));
            }
            let root = tree.append_leaf(leaf);

            if entry.published_on_chain {
                last_published_root = Some(entry.last_known_root);
            } else if entry.last_known_root != root {
                warn!(
                    market_id = %entry.market_id,
                    recorded = %entry.last_known_root,
                    rebuilt = %root,
                    "Ledger root differs from rebuilt root"
                );
            }
            last_block = last_block.max(Some(entry.block_number));
        }

        info!(leaves = tree.len(), root = %tree.root(), "Commitment tree restored from ledger");

        Ok(Self {
            state: Arc::new(RwLock::new(IndexState {
                tree,
                ledger,
                last_published_root,
                last_block,
                last_publish: None,
            })),
        })
    }

    /// Controller over an empty in-memory ledger
    pub fn in_memory() -> Self {
        let state = IndexState {
            tree: CommitmentTree::new(),
            ledger: Box::new(MemoryLedger::new()),
            last_published_root: None,
            last_block: None,
            last_publish: None,
        };
        Self { state: Arc::new(RwLock::new(state)) }
    }

    /// Read-only view for queries
    pub fn reader(&self) -> IndexReader {
        IndexReader { state: Arc::clone(&self.state) }
    }

    /// Block to resume scanning from, if anything has been ingested
    pub async fn resume_block(&self) -> Option<u64> {
        self.state.read().await.last_block
    }

    /// Commit one market.
    ///
    /// Re-delivered events are no-ops. An event that reuses a committed id with
    /// another address is rejected and the registry keeps the first one.
    pub async fn on_market_created(
        &self,
        event: &MarketCreated,
    ) -> Result<IngestOutcome, LedgerError> {
        let leaf = MarketLeaf::new(event.market_id, event.market_address);
        let mut state = self.state.write().await;

        if let Some(existing) = state.ledger.get(&event.market_id) {
            if existing.market_address != event.market_address {
                error!(
                    market_id = %event.market_id,
                    recorded = %existing.market_address,
                    received = %event.market_address,
                    block = event.block_number,
                    "Conflicting MarketCreated event rejected"
                );
                return Ok(IngestOutcome::Conflict { recorded: existing.market_address });
            }
            debug!(market_id = %event.market_id, "Market already committed");
            return Ok(IngestOutcome::Duplicate);
        }

        let digest = leaf.digest();
        let leaf_index = state.tree.len();
        let root = state.tree.root_after(&digest);
        state.ledger.put(LedgerEntry::new(leaf, leaf_index as u64, event.block_number, root))?;
        state.tree.append_leaf(digest);
        state.last_block = state.last_block.max(Some(event.block_number));

        info!(
            market_id = %event.market_id,
            market_address = %event.market_address,
            leaf_index,
            %root,
            "Market committed"
        );
        Ok(IngestOutcome::Appended { leaf_index, root })
    }

    /// Consume events until the channel closes.
    ///
    /// Stops at the first ledger failure; nothing after it is ingested.
    pub async fn run(&self, mut events: mpsc::Receiver<MarketCreated>) -> Result<(), LedgerError> {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.on_market_created(&event).await {
                error!(market_id = %event.market_id, error = %e, "Ledger write failed, halting ingestion");
                return Err(e);
            }
        }
        debug!("Event channel closed");
        Ok(())
    }

    /// Current root and publish bookkeeping
    pub async fn publish_candidate(&self) -> PublishCandidate {
        let state = self.state.read().await;
        PublishCandidate {
            root: state.tree.root(),
            leaf_count: state.tree.len(),
            last_published_root: state.last_published_root,
        }
    }

    /// Mark the first `candidate.leaf_count` leaves as published under `candidate.root`.
    ///
    /// The published root is only adopted once the ledger holds the update, so
    /// a failed write leaves the root pending and the next tick records it again.
    /// Returns how many entries changed.
    pub async fn record_publish_success(
        &self,
        candidate: &PublishCandidate,
    ) -> Result<usize, LedgerError> {
        let at = unix_now();
        let mut state = self.state.write().await;

        let covered: Vec<_> = state
            .ledger
            .list_unpublished()
            .into_iter()
            .filter(|e| e.leaf_index < candidate.leaf_count as u64)
            .map(|mut entry| {
                entry.published_on_chain = true;
                entry.last_known_root = candidate.root;
                entry.last_publish_attempt_at = Some(at);
                entry.last_publish_error = None;
                entry
            })
            .collect();
        let updated = covered.len();
        state.ledger.put_batch(covered)?;

        state.last_published_root = Some(candidate.root);
        state.last_publish = Some(PublishAttempt { at, root: candidate.root, error: None });
        Ok(updated)
    }

    /// Record a failed attempt against every unpublished entry
    pub async fn record_publish_failure(&self, root: B256, error: &str) -> Result<(), LedgerError> {
        let at = unix_now();
        let mut state = self.state.write().await;
        state.last_publish = Some(PublishAttempt { at, root, error: Some(error.to_string()) });

        let attempted = state
            .ledger
            .list_unpublished()
            .into_iter()
            .map(|mut entry| {
                entry.last_publish_attempt_at = Some(at);
                entry.last_publish_error = Some(error.to_string());
                entry
            })
            .collect();
        state.ledger.put_batch(attempted)
    }
}

/// Shared read access to the tree and ledger
#[derive(Clone, Debug)]
pub struct IndexReader {
    state: Arc<RwLock<IndexState>>,
}

impl IndexReader {
    /// Run `f` against one consistent view of the tree and ledger
    pub async fn read<R>(&self, f: impl FnOnce(&CommitmentTree, &dyn LedgerStore) -> R) -> R {
        let state = self.state.read().await;
        f(&state.tree, state.ledger.as_ref())
    }

    /// Current state summary
    pub async fn status(&self) -> IndexStatus {
        let state = self.state.read().await;
        IndexStatus {
            leaf_count: state.tree.len(),
            root: (!state.tree.is_empty()).then(|| state.tree.root()),
            last_published_root: state.last_published_root,
            unpublished: state.ledger.list_unpublished().len(),
            last_block: state.last_block,
            last_publish: state.last_publish.clone(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ledger::FileLedger, testing::FlakyLedger};
    use predmarket_merkle::encode_leaf;
    use std::sync::atomic::Ordering;

    fn event(id: u64, address: u8, block: u64) -> MarketCreated {
        MarketCreated {
            market_id: U256::from(id),
            market_address: Address::repeat_byte(address),
            block_number: block,
            log_index: 0,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("predmarket-controller-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("ledger.jsonl")
    }

    #[tokio::test]
    async fn test_append_and_duplicate() {
        let controller = IndexerController::in_memory();
        let first = controller.on_market_created(&event(1, 0xaa, 10)).await.unwrap();
        let IngestOutcome::Appended { leaf_index, root } = first else {
            panic!("expected append, got {first:?}");
        };
        assert_eq!(leaf_index, 0);
        assert_eq!(root, encode_leaf(U256::from(1u64), Address::repeat_byte(0xaa)));

        let again = controller.on_market_created(&event(1, 0xaa, 10)).await.unwrap();
        assert_eq!(again, IngestOutcome::Duplicate);

        let candidate = controller.publish_candidate().await;
        assert_eq!(candidate.leaf_count, 1);
        assert_eq!(candidate.root, root);
    }

    #[tokio::test]
    async fn test_conflicting_address_is_rejected() {
        let controller = IndexerController::in_memory();
        controller.on_market_created(&event(1, 0xaa, 10)).await.unwrap();
        let root = controller.publish_candidate().await.root;

        let outcome = controller.on_market_created(&event(1, 0xcc, 11)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Conflict { recorded: Address::repeat_byte(0xaa) });

        let after = controller.publish_candidate().await;
        assert_eq!(after.leaf_count, 1);
        assert_eq!(after.root, root);
    }

    #[tokio::test]
    async fn test_restart_reproduces_root() {
        let path = temp_path("restart");
        let root = {
            let controller =
                IndexerController::open(Box::new(FileLedger::open(&path).unwrap())).unwrap();
            for n in 1..=5 {
                controller.on_market_created(&event(n, n as u8, 100 + n)).await.unwrap();
            }
            let candidate = controller.publish_candidate().await;
            controller.record_publish_success(&candidate).await.unwrap();
            controller.on_market_created(&event(6, 6, 200)).await.unwrap();
            controller.publish_candidate().await.root
        };

        let restored =
            IndexerController::open(Box::new(FileLedger::open(&path).unwrap())).unwrap();
        let candidate = restored.publish_candidate().await;
        assert_eq!(candidate.root, root);
        assert_eq!(candidate.leaf_count, 6);
        assert!(candidate.last_published_root.is_some());
        assert_ne!(candidate.last_published_root, Some(root));
        assert_eq!(restored.resume_block().await, Some(200));

        // replayed markets stay idempotent
        let again = restored.on_market_created(&event(3, 3, 103)).await.unwrap();
        assert_eq!(again, IngestOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_publish_marks_only_covered_entries() {
        let controller = IndexerController::in_memory();
        controller.on_market_created(&event(1, 1, 1)).await.unwrap();
        controller.on_market_created(&event(2, 2, 2)).await.unwrap();
        let candidate = controller.publish_candidate().await;
        controller.on_market_created(&event(3, 3, 3)).await.unwrap();

        let updated = controller.record_publish_success(&candidate).await.unwrap();
        assert_eq!(updated, 2);

        let status = controller.reader().status().await;
        assert_eq!(status.unpublished, 1);
        assert_eq!(status.last_published_root, Some(candidate.root));
        assert_ne!(status.root, Some(candidate.root));
    }

    #[tokio::test]
    async fn test_publish_failure_is_recorded() {
        let controller = IndexerController::in_memory();
        controller.on_market_created(&event(1, 1, 1)).await.unwrap();
        let root = controller.publish_candidate().await.root;
        controller.record_publish_failure(root, "nonce too low").await.unwrap();

        let entry = controller
            .reader()
            .read(|_, ledger| ledger.get(&U256::from(1u64)))
            .await
            .unwrap();
        assert!(!entry.published_on_chain);
        assert_eq!(entry.last_publish_error.as_deref(), Some("nonce too low"));
        assert!(entry.last_publish_attempt_at.is_some());

        let status = controller.reader().status().await;
        assert_eq!(status.last_publish.unwrap().error.as_deref(), Some("nonce too low"));
    }

    #[tokio::test]
    async fn test_failed_success_write_keeps_root_pending() {
        let (ledger, failing_writes) = FlakyLedger::new();
        let controller = IndexerController::open(Box::new(ledger)).unwrap();
        controller.on_market_created(&event(1, 1, 1)).await.unwrap();
        let candidate = controller.publish_candidate().await;

        failing_writes.store(1, Ordering::Release);
        assert!(controller.record_publish_success(&candidate).await.is_err());
        let status = controller.reader().status().await;
        assert_eq!(status.unpublished, 1);
        assert!(status.last_published_root.is_none());
        assert!(status.last_publish.is_none());

        assert_eq!(controller.record_publish_success(&candidate).await.unwrap(), 1);
        let status = controller.reader().status().await;
        assert_eq!(status.unpublished, 0);
        assert_eq!(status.last_published_root, Some(candidate.root));
    }

    #[tokio::test]
    async fn test_repeated_failures_keep_ledger_compact() {
        let path = temp_path("failures");
        let controller =
            IndexerController::open(Box::new(FileLedger::open(&path).unwrap())).unwrap();
        for n in 1..=100 {
            controller.on_market_created(&event(n, n as u8, n)).await.unwrap();
        }
        let root = controller.publish_candidate().await.root;
        for _ in 0..10 {
            controller.record_publish_failure(root, "execution reverted").await.unwrap();
        }

        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert!(lines <= 2 * 100 + 64, "ledger grew to {lines} lines");
        assert_eq!(controller.reader().status().await.unpublished, 100);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let controller = IndexerController::in_memory();
        let (tx, rx) = mpsc::channel(8);
        for n in 1..=3 {
            tx.send(event(n, n as u8, n)).await.unwrap();
        }
        tx.send(event(2, 2, 2)).await.unwrap();
        drop(tx);

        controller.run(rx).await.unwrap();
        assert_eq!(controller.publish_candidate().await.leaf_count, 3);
    }

    #[test]
    fn test_open_rejects_gaps() {
        let mut ledger = MemoryLedger::new();
        let leaf = MarketLeaf::new(U256::from(1u64), Address::repeat_byte(1));
        ledger.put(LedgerEntry::new(leaf, 1, 10, B256::ZERO)).unwrap();
        assert!(matches!(
            IndexerController::open(Box::new(ledger)),
            Err(ControllerError::LeafGap { expected: 0, found: 1 })
        ));
    }
}
