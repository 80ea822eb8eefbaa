//! Market registry indexer
//!
//! Follows the factory's `MarketCreated` events, commits every market into an
//! append-only Merkle tree backed by a durable ledger, periodically publishes
//! the root on-chain and serves inclusion proofs over HTTP.
//!
//! Data flow:
//! - [`ChainEventSource`] polls confirmed logs and sends decoded events down a
//!   channel
//! - [`IndexerController`] writes each new market to the ledger, then appends
//!   its leaf
//! - [`RootPublisher`] submits the root whenever it differs from the last
//!   confirmed one
//! - [`ProofService`] answers root and proof queries from the same state

mod backoff;
mod chain;
mod config;
mod controller;
mod event_source;
pub mod http;
mod ledger;
mod publisher;
mod query;
mod rpc;
mod service;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use chain::{ChainClient, ChainError};
pub use config::{BackoffConfig, Config, ConfigError};
pub use controller::{
    ControllerError, IndexReader, IndexStatus, IndexerController, IngestOutcome, PublishAttempt,
    PublishCandidate,
};
pub use event_source::{
    ChainEventSource, EventSourceConfig, EventSourceHandle, PollReport, SourceError,
};
pub use ledger::{FileLedger, LedgerEntry, LedgerError, LedgerStore, MemoryLedger};
pub use publisher::{RootPublisher, SkipReason, TickOutcome};
pub use query::{MarketProof, ProofService, QueryError};
pub use rpc::JsonRpcClient;
pub use service::IndexerService;
