//! `MarketCreated` event source
//!
//! Polls the factory's logs in bounded block ranges, holding back the newest
//! `confirmation_depth` blocks, and forwards decoded events in chain order.

use std::{sync::Arc, time::Duration};

use predmarket_bindings::MarketCreated;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    backoff::Backoff,
    chain::{ChainClient, ChainError},
    config::{BackoffConfig, Config},
};

/// Event source error
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Chain read failed
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The consumer dropped its receiver
    #[error("event consumer closed")]
    Closed,
}

/// Polling parameters
#[derive(Clone, Debug)]
pub struct EventSourceConfig {
    /// First block to scan
    pub start_block: u64,
    /// Blocks held back from the head
    pub confirmation_depth: u64,
    /// Widest range per log request
    pub max_block_range: u64,
    /// Wait between polls once caught up
    pub poll_interval: Duration,
    /// Retry backoff after a failed poll
    pub backoff: BackoffConfig,
}

impl From<&Config> for EventSourceConfig {
    fn from(config: &Config) -> Self {
        Self {
            start_block: config.start_block,
            confirmation_depth: config.confirmation_depth,
            max_block_range: config.max_block_range,
            poll_interval: config.poll_interval,
            backoff: config.backoff.clone(),
        }
    }
}

/// Summary of one poll
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Events forwarded
    pub delivered: usize,
    /// Logs that failed to decode
    pub rejected: usize,
    /// Whether the scan reached the confirmed head
    pub caught_up: bool,
}

/// Cursor-driven log poller
#[derive(Debug)]
pub struct ChainEventSource {
    client: Arc<dyn ChainClient>,
    config: EventSourceConfig,
    next_block: u64,
    last_delivered: Option<(u64, u64)>,
}

impl ChainEventSource {
    /// Create a source starting at `config.start_block`
    pub fn new(client: Arc<dyn ChainClient>, config: EventSourceConfig) -> Self {
        let next_block = config.start_block;
        Self { client, config, next_block, last_delivered: None }
    }

    /// Move the cursor forward to `block` if it is ahead.
    ///
    /// The block itself is scanned again; the consumer absorbs the repeats.
    pub fn resume_from(mut self, block: u64) -> Self {
        self.next_block = self.next_block.max(block);
        self
    }

    /// Next block to be scanned
    pub const fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Fetch one range of confirmed logs and forward its events.
    ///
    /// The position of each event is recorded as soon as it is sent, so a poll
    /// that fails partway resumes after the last event delivered. The block
    /// cursor only moves past the range once all of it was forwarded.
    pub async fn poll_once(
        &mut self,
        sink: &mpsc::Sender<MarketCreated>,
    ) -> Result<PollReport, SourceError> {
        let head = self.client.block_number().await?;
        let Some(safe_head) = head.checked_sub(self.config.confirmation_depth) else {
            return Ok(PollReport { caught_up: true, ..Default::default() });
        };
        if self.next_block > safe_head {
            return Ok(PollReport { caught_up: true, ..Default::default() });
        }

        let span = self.config.max_block_range.max(1) - 1;
        let to_block = safe_head.min(self.next_block.saturating_add(span));
        let logs = self.client.market_created_logs(self.next_block, to_block).await?;
        debug!(from = self.next_block, to = to_block, logs = logs.len(), "Fetched MarketCreated logs");

        let mut report = PollReport { caught_up: to_block == safe_head, ..Default::default() };
        let mut events = Vec::with_capacity(logs.len());
        for log in logs.iter().filter(|log| !log.removed) {
            match MarketCreated::decode(log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    report.rejected += 1;
                    warn!(tx = ?log.transaction_hash, error = %e, "Skipping malformed MarketCreated log");
                }
            }
        }
        events.sort_by_key(|e| (e.block_number, e.log_index));

        for event in events {
            let position = (event.block_number, event.log_index);
            if self.last_delivered.is_some_and(|last| position <= last) {
                continue;
            }
            sink.send(event).await.map_err(|_| SourceError::Closed)?;
            self.last_delivered = Some(position);
            report.delivered += 1;
        }

        self.next_block = to_block + 1;
        Ok(report)
    }

    /// Poll until `shutdown` flips or the consumer goes away.
    ///
    /// Chain failures are retried with backoff and never end the loop.
    pub async fn run(mut self, sink: mpsc::Sender<MarketCreated>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        info!(
            from_block = self.next_block,
            confirmation_depth = self.config.confirmation_depth,
            "Event source started"
        );

        loop {
            let delay = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.poll_once(&sink) => match result {
                    Ok(report) => {
                        backoff.reset();
                        if report.delivered > 0 {
                            info!(delivered = report.delivered, next_block = self.next_block, "Forwarded market events");
                        }
                        if report.caught_up { self.config.poll_interval } else { Duration::ZERO }
                    }
                    Err(SourceError::Closed) => {
                        info!("Event consumer closed");
                        break;
                    }
                    Err(SourceError::Chain(e)) => {
                        let delay = backoff.next_delay();
                        warn!(error = %e, attempt = backoff.attempts(), retry_in = ?delay, "Log poll failed");
                        delay
                    }
                }
            };

            if *shutdown.borrow() {
                break;
            }
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(delay) => {}
                }
            }
        }
        info!(next_block = self.next_block, "Event source stopped");
    }

    /// Run on a background task
    pub fn start(self, sink: mpsc::Sender<MarketCreated>) -> EventSourceHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(sink, rx));
        EventSourceHandle { shutdown, task }
    }
}

/// Handle to a running [`ChainEventSource`]
#[derive(Debug)]
pub struct EventSourceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EventSourceHandle {
    /// Stop polling and wait for the task to finish.
    ///
    /// Events already sent stay in the channel; nothing is sent afterwards.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Event source task failed");
        }
    }
}
