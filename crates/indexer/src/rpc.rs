//! JSON-RPC chain client

use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use predmarket_bindings::{
    decode_bytes32, encode_root_getter, encode_update_root, market_created_topic, parse_quantity,
    RawLog, TxStatus,
};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::{
    chain::{ChainClient, ChainError},
    config::Config,
};

/// Delay between receipt polls
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// [`ChainClient`] speaking Ethereum JSON-RPC over HTTP.
///
/// Root updates go through `eth_sendTransaction`, so the node signs with an
/// account it manages.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
    factory: Address,
    signer: Option<Address>,
    receipt_timeout: Duration,
}

impl JsonRpcClient {
    /// Create a client for the configured node and factory.
    ///
    /// Every request is bounded by `config.rpc_timeout`; a node that accepts the
    /// connection and never answers surfaces as a transient transport error.
    pub fn new(config: &Config) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder().timeout(config.rpc_timeout).build()?;
        Ok(Self {
            http_client,
            rpc_url: config.rpc_url.clone(),
            factory: config.factory_address,
            signer: config.signer_address,
            receipt_timeout: config.receipt_timeout,
        })
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json::<Value>()
            .await?;

        if let Some(error) = response.get("error") {
            return Err(ChainError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Malformed(format!("no result in {method} response")))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<(), ChainError> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self.rpc_call("eth_getTransactionReceipt", json!([tx_hash])).await?;
            if !receipt.is_null() {
                let status = receipt
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChainError::Malformed("receipt has no status".to_string()))?;
                return match TxStatus::from_quantity(status)? {
                    TxStatus::Success => Ok(()),
                    TxStatus::Reverted => Err(ChainError::Reverted(tx_hash)),
                };
            }
            if Instant::now() >= deadline {
                return Err(ChainError::Unconfirmed(tx_hash, self.receipt_timeout));
            }
            debug!(%tx_hash, "Receipt not available yet");
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

fn as_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, ChainError> {
    value.as_str().ok_or_else(|| ChainError::Malformed(format!("{what} is not a string: {value}")))
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let result = self.rpc_call("eth_blockNumber", json!([])).await?;
        Ok(parse_quantity(as_str(&result, "block number")?)?)
    }

    async fn market_created_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainError> {
        let filter = json!({
            "address": self.factory,
            "topics": [market_created_topic()],
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
        });
        let result = self.rpc_call("eth_getLogs", json!([filter])).await?;
        serde_json::from_value(result).map_err(|e| ChainError::Malformed(e.to_string()))
    }

    async fn published_root(&self) -> Result<B256, ChainError> {
        let call = json!({
            "to": self.factory,
            "data": format!("0x{}", hex::encode(encode_root_getter())),
        });
        let result = self.rpc_call("eth_call", json!([call, "latest"])).await?;
        let data = hex::decode(as_str(&result, "call result")?.trim_start_matches("0x"))
            .map_err(|e| ChainError::Malformed(e.to_string()))?;
        Ok(decode_bytes32(&data)?)
    }

    async fn submit_root(&self, root: B256) -> Result<B256, ChainError> {
        let from = self.signer.ok_or(ChainError::NoSigner)?;
        let tx_request = json!({
            "from": from,
            "to": self.factory,
            "data": format!("0x{}", hex::encode(encode_update_root(&root))),
        });

        let result = self.rpc_call("eth_sendTransaction", json!([tx_request])).await?;
        let tx_hash: B256 = as_str(&result, "transaction hash")?
            .parse()
            .map_err(|_| ChainError::Malformed(format!("invalid transaction hash {result}")))?;
        info!(%tx_hash, %root, "Root update sent, waiting for receipt");

        self.wait_for_receipt(tx_hash).await?;
        Ok(tx_hash)
    }
}
