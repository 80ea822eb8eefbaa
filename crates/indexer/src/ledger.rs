//! Durable market ledger
//!
//! One [`LedgerEntry`] per committed market, keyed by market id. The file
//! backend appends one JSON object per line; a later line for the same market
//! supersedes earlier ones. The file is compacted when opened and again once
//! superseded lines outnumber live ones.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use alloy_primitives::{Address, B256, U256};
use predmarket_merkle::MarketLeaf;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Ledger error
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Reading or writing the backing file failed
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    /// A record other than the last one cannot be parsed
    #[error("corrupt ledger record at line {line}: {source}")]
    Corrupt {
        /// 1-based line number
        line: usize,
        /// Parse failure
        source: serde_json::Error,
    },
    /// An entry cannot be serialized
    #[error("ledger encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistent record of one committed market
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Factory-assigned market id
    pub market_id: U256,
    /// Market contract address
    pub market_address: Address,
    /// Position of the leaf in the commitment tree
    pub leaf_index: u64,
    /// Block of the `MarketCreated` event
    pub block_number: u64,
    /// Root right after this leaf was appended, or the root it was published under
    pub last_known_root: B256,
    /// Whether a root covering this leaf was confirmed on-chain
    pub published_on_chain: bool,
    /// Unix seconds of the last publish attempt covering this leaf
    #[serde(default)]
    pub last_publish_attempt_at: Option<u64>,
    /// Error of the last failed publish attempt
    #[serde(default)]
    pub last_publish_error: Option<String>,
}

impl LedgerEntry {
    /// Entry for a freshly appended leaf
    pub const fn new(leaf: MarketLeaf, leaf_index: u64, block_number: u64, root: B256) -> Self {
        Self {
            market_id: leaf.market_id,
            market_address: leaf.market_address,
            leaf_index,
            block_number,
            last_known_root: root,
            published_on_chain: false,
            last_publish_attempt_at: None,
            last_publish_error: None,
        }
    }

    /// The leaf this entry commits
    pub const fn leaf(&self) -> MarketLeaf {
        MarketLeaf::new(self.market_id, self.market_address)
    }
}

/// Storage for ledger entries
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Entry for a market id
    fn get(&self, market_id: &U256) -> Option<LedgerEntry>;

    /// Insert or replace the entry for `entry.market_id`.
    ///
    /// Returns only after the entry is durable.
    fn put(&mut self, entry: LedgerEntry) -> Result<(), LedgerError>;

    /// Insert or replace several entries with a single durable write.
    fn put_batch(&mut self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        for entry in entries {
            self.put(entry)?;
        }
        Ok(())
    }

    /// Entries not yet covered by a confirmed on-chain root, by leaf index
    fn list_unpublished(&self) -> Vec<LedgerEntry>;

    /// All entries, by leaf index
    fn entries(&self) -> Vec<LedgerEntry>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Whether the ledger holds no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory ledger, also the index behind [`FileLedger`]
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    entries: Vec<LedgerEntry>,
    by_id: HashMap<U256, usize>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&mut self, entry: LedgerEntry) {
        match self.by_id.get(&entry.market_id) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.by_id.insert(entry.market_id, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn sorted(&self, filter: impl Fn(&LedgerEntry) -> bool) -> Vec<LedgerEntry> {
        let mut out: Vec<_> = self.entries.iter().filter(|e| filter(e)).cloned().collect();
        out.sort_by_key(|e| e.leaf_index);
        out
    }
}

impl LedgerStore for MemoryLedger {
    fn get(&self, market_id: &U256) -> Option<LedgerEntry> {
        self.by_id.get(market_id).map(|&slot| self.entries[slot].clone())
    }

    fn put(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.upsert(entry);
        Ok(())
    }

    fn list_unpublished(&self) -> Vec<LedgerEntry> {
        self.sorted(|e| !e.published_on_chain)
    }

    fn entries(&self) -> Vec<LedgerEntry> {
        self.sorted(|_| true)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Superseded lines tolerated on top of one line per market before compacting
const COMPACT_SLACK: usize = 64;

/// JSON-lines ledger file
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    file: File,
    index: MemoryLedger,
    lines: usize,
}

impl FileLedger {
    /// Open or create the ledger at `path`.
    ///
    /// A torn final record left by a crash is dropped; corruption anywhere else
    /// is an error. The surviving entries are rewritten one per market.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut index = MemoryLedger::new();
        let mut records = 0;
        if path.exists() {
            let lines = BufReader::new(File::open(&path)?)
                .lines()
                .collect::<Result<Vec<_>, _>>()?;
            let last = lines.iter().rposition(|l| !l.trim().is_empty());
            for (i, line) in lines.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LedgerEntry>(line) {
                    Ok(entry) => {
                        index.upsert(entry);
                        records += 1;
                    }
                    Err(e) if Some(i) == last => {
                        warn!(path = %path.display(), line = i + 1, error = %e, "Dropping torn ledger record");
                    }
                    Err(source) => return Err(LedgerError::Corrupt { line: i + 1, source }),
                }
            }
        }

        compact(&path, &index)?;
        let file = open_append(&path)?;
        info!(path = %path.display(), records, markets = index.len(), "Ledger opened");

        let lines = index.len();
        Ok(Self { path, file, index, lines })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for entry in &entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        self.file.write_all(&buf)?;
        self.file.flush()?;
        self.file.sync_data()?;

        self.lines += entries.len();
        for entry in entries {
            self.index.upsert(entry);
        }
        self.compact_if_stale()
    }

    fn compact_if_stale(&mut self) -> Result<(), LedgerError> {
        if self.lines <= self.index.len() * 2 + COMPACT_SLACK {
            return Ok(());
        }
        let before = self.lines;
        compact(&self.path, &self.index)?;
        self.file = open_append(&self.path)?;
        self.lines = self.index.len();
        debug!(path = %self.path.display(), before, after = self.lines, "Ledger compacted");
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File, LedgerError> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Rewrite the ledger with one record per market, atomically
fn compact(path: &Path, index: &MemoryLedger) -> Result<(), LedgerError> {
    let tmp = path.with_extension("compact.tmp");
    {
        let mut out = File::create(&tmp)?;
        for entry in index.entries() {
            serde_json::to_writer(&mut out, &entry)?;
            out.write_all(b"\n")?;
        }
        out.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl LedgerStore for FileLedger {
    fn get(&self, market_id: &U256) -> Option<LedgerEntry> {
        self.index.get(market_id)
    }

    fn put(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.append(vec![entry])
    }

    fn put_batch(&mut self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        self.append(entries)
    }

    fn list_unpublished(&self) -> Vec<LedgerEntry> {
        self.index.list_unpublished()
    }

    fn entries(&self) -> Vec<LedgerEntry> {
        self.index.entries()
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
