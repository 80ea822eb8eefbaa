//! Configuration

use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use alloy_primitives::Address;

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("{0} must be set")]
    Missing(&'static str),
    /// A variable is set but cannot be parsed
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },
}

/// Retry backoff bounds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial: Duration,
    /// Upper bound on any delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { initial: Duration::from_millis(1_000), max: Duration::from_millis(60_000) }
    }
}

/// Indexer configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// JSON-RPC endpoint of the chain node
    pub rpc_url: String,
    /// Market factory emitting `MarketCreated` and storing the root
    pub factory_address: Address,
    /// Node-managed account that sends root updates; `None` disables publishing
    pub signer_address: Option<Address>,
    /// Time between publish attempts
    pub publish_interval: Duration,
    /// Blocks to wait before a log is considered final
    pub confirmation_depth: u64,
    /// Time between log polls once caught up
    pub poll_interval: Duration,
    /// Widest block range requested per `eth_getLogs`
    pub max_block_range: u64,
    /// First block scanned on a fresh ledger
    pub start_block: u64,
    /// Retry backoff for chain reads
    pub backoff: BackoffConfig,
    /// Time to wait for a root update receipt
    pub receipt_timeout: Duration,
    /// Upper bound on a single JSON-RPC request
    pub rpc_timeout: Duration,
    /// Append-only ledger file
    pub ledger_path: PathBuf,
    /// Query API listen address
    pub http_addr: SocketAddr,
    /// Buffered events between the source and the controller
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            factory_address: Address::ZERO,
            signer_address: None,
            publish_interval: Duration::from_secs(3_600),
            confirmation_depth: 0,
            poll_interval: Duration::from_secs(5),
            max_block_range: 2_000,
            start_block: 0,
            backoff: BackoffConfig::default(),
            receipt_timeout: Duration::from_secs(120),
            rpc_timeout: Duration::from_secs(30),
            ledger_path: PathBuf::from("data/ledger.jsonl"),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            event_channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let factory_address = match get("FACTORY_ADDRESS") {
            Some(raw) => parse_value("FACTORY_ADDRESS", raw)?,
            None => return Err(ConfigError::Missing("FACTORY_ADDRESS")),
        };
        let signer_address =
            get("SIGNER_ADDRESS").map(|raw| parse_value("SIGNER_ADDRESS", raw)).transpose()?;

        let backoff = BackoffConfig {
            initial: millis(&get, "BACKOFF_INITIAL_MS", defaults.backoff.initial)?,
            max: millis(&get, "BACKOFF_MAX_MS", defaults.backoff.max)?,
        };
        if backoff.initial > backoff.max {
            return Err(ConfigError::Invalid {
                key: "BACKOFF_INITIAL_MS",
                value: backoff.initial.as_millis().to_string(),
            });
        }

        let max_block_range: u64 = or_default(&get, "MAX_BLOCK_RANGE", defaults.max_block_range)?;
        if max_block_range == 0 {
            return Err(ConfigError::Invalid { key: "MAX_BLOCK_RANGE", value: "0".to_string() });
        }
        let rpc_timeout = secs(&get, "RPC_TIMEOUT_SECS", defaults.rpc_timeout)?;
        if rpc_timeout.is_zero() {
            return Err(ConfigError::Invalid { key: "RPC_TIMEOUT_SECS", value: "0".to_string() });
        }
        let event_channel_capacity: usize =
            or_default(&get, "EVENT_CHANNEL_CAPACITY", defaults.event_channel_capacity)?;
        if event_channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "EVENT_CHANNEL_CAPACITY",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            rpc_url: get("RPC_URL").unwrap_or(defaults.rpc_url),
            factory_address,
            signer_address,
            publish_interval: secs(&get, "PUBLISH_INTERVAL_SECS", defaults.publish_interval)?,
            confirmation_depth: or_default(&get, "CONFIRMATION_DEPTH", defaults.confirmation_depth)?,
            poll_interval: secs(&get, "POLL_INTERVAL_SECS", defaults.poll_interval)?,
            max_block_range,
            start_block: or_default(&get, "START_BLOCK", defaults.start_block)?,
            backoff,
            receipt_timeout: secs(&get, "RECEIPT_TIMEOUT_SECS", defaults.receipt_timeout)?,
            rpc_timeout,
            ledger_path: get("LEDGER_PATH").map(PathBuf::from).unwrap_or(defaults.ledger_path),
            http_addr: or_default(&get, "HTTP_ADDR", defaults.http_addr)?,
            event_channel_capacity,
        })
    }

    /// Whether a signer is configured for root updates
    pub const fn publishing_enabled(&self) -> bool {
        self.signer_address.is_some()
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid { key, value: raw })
}

fn or_default<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key).map(|raw| parse_value(key, raw)).transpose().map(|v| v.unwrap_or(default))
}

fn secs<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    or_default(get, key, default.as_secs()).map(Duration::from_secs)
}

fn millis<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    or_default(get, key, default.as_millis() as u64).map(Duration::from_millis)
}
