//! In-memory chain and ledger doubles for tests

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use predmarket_bindings::{market_created_topic, RawLog};
use tokio::sync::Notify;

use crate::{
    chain::{ChainClient, ChainError},
    ledger::{LedgerEntry, LedgerError, LedgerStore, MemoryLedger},
};

#[derive(Debug, Default)]
struct MockState {
    head: u64,
    logs: Vec<RawLog>,
    root: B256,
    submissions: Vec<B256>,
    failing_reads: usize,
    failing_root_reads: usize,
    failing_submits: usize,
    hold_submits: bool,
}

/// Factory and node simulated in memory
#[derive(Debug, Default)]
pub(crate) struct MockChain {
    state: Mutex<MockState>,
    submit_started: Notify,
    release: Notify,
}

impl MockChain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub(crate) fn push_log(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    /// Fail the next `n` head reads
    pub(crate) fn fail_reads(&self, n: usize) {
        self.state.lock().unwrap().failing_reads = n;
    }

    /// Fail the next `n` on-chain root reads
    pub(crate) fn fail_root_reads(&self, n: usize) {
        self.state.lock().unwrap().failing_root_reads = n;
    }

    /// Fail the next `n` root submissions
    pub(crate) fn fail_submits(&self, n: usize) {
        self.state.lock().unwrap().failing_submits = n;
    }

    /// Park submissions until [`MockChain::release`] is called
    pub(crate) fn hold_submits(&self) {
        self.state.lock().unwrap().hold_submits = true;
    }

    pub(crate) fn release(&self) {
        self.state.lock().unwrap().hold_submits = false;
        self.release.notify_waiters();
    }

    /// Resolves once a submission has started
    pub(crate) async fn submit_started(&self) {
        self.submit_started.notified().await;
    }

    pub(crate) fn set_root(&self, root: B256) {
        self.state.lock().unwrap().root = root;
    }

    pub(crate) fn root(&self) -> B256 {
        self.state.lock().unwrap().root
    }

    pub(crate) fn submissions(&self) -> Vec<B256> {
        self.state.lock().unwrap().submissions.clone()
    }
}

fn rpc_failure() -> ChainError {
    ChainError::Rpc { code: -32000, message: "connection reset".to_string() }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(rpc_failure());
        }
        Ok(state.head)
    }

    async fn market_created_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.position().is_ok_and(|(block, _)| (from_block..=to_block).contains(&block))
            })
            .cloned()
            .collect())
    }

    async fn published_root(&self) -> Result<B256, ChainError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_root_reads > 0 {
            state.failing_root_reads -= 1;
            return Err(rpc_failure());
        }
        Ok(state.root)
    }

    async fn submit_root(&self, root: B256) -> Result<B256, ChainError> {
        let release = self.release.notified();
        tokio::pin!(release);
        release.as_mut().enable();
        self.submit_started.notify_one();

        let hold = self.state.lock().unwrap().hold_submits;
        if hold {
            release.await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(rpc_failure());
        }
        state.root = root;
        state.submissions.push(root);
        Ok(B256::with_last_byte(state.submissions.len() as u8))
    }
}

/// `MarketCreated` log with both arguments in data
pub(crate) fn market_log(id: u64, address: u8, block: u64, index: u64) -> RawLog {
    let mut data = U256::from(id).to_be_bytes::<32>().to_vec();
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(Address::repeat_byte(address).as_slice());
    RawLog {
        address: Address::repeat_byte(0xfa),
        topics: vec![market_created_topic()],
        data: Bytes::from(data),
        block_number: Some(format!("{block:#x}")),
        log_index: Some(format!("{index:#x}")),
        transaction_hash: Some(B256::with_last_byte(block as u8)),
        removed: false,
    }
}

/// Memory ledger whose writes can be made to fail
#[derive(Debug, Default)]
pub(crate) struct FlakyLedger {
    inner: MemoryLedger,
    failing_writes: Arc<AtomicUsize>,
}

impl FlakyLedger {
    /// Ledger plus a counter of upcoming writes to fail
    pub(crate) fn new() -> (Self, Arc<AtomicUsize>) {
        let ledger = Self::default();
        let failing = Arc::clone(&ledger.failing_writes);
        (ledger, failing)
    }

    fn check(&self) -> Result<(), LedgerError> {
        let failing =
            self.failing_writes.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match failing {
            Ok(_) => Err(LedgerError::Io(std::io::Error::other("disk full"))),
            Err(_) => Ok(()),
        }
    }
}

impl LedgerStore for FlakyLedger {
    fn get(&self, market_id: &U256) -> Option<LedgerEntry> {
        self.inner.get(market_id)
    }

    fn put(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.check()?;
        self.inner.put(entry)
    }

    fn put_batch(&mut self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        self.check()?;
        self.inner.put_batch(entries)
    }

    fn list_unpublished(&self) -> Vec<LedgerEntry> {
        self.inner.list_unpublished()
    }

    fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.entries()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
