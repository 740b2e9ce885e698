mod utils;

use crate::rpc::utils::json_to_block;
use eyre::{eyre, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub use utils::RpcBlock;

/// Minimal Ethereum JSON-RPC client for block headers.
#[derive(Debug, Clone)]
pub struct EthRpcClient {
    client: Client,
    rpc_url: String,
}

impl EthRpcClient {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let data = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .json(&data)
            .send()
            .await?
            .error_for_status()?;

        let mut result: Value = response.json().await?;
        if let Some(error) = result.get("error") {
            return Err(eyre!("{} failed: {}", method, error));
        }

        Ok(result
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    pub async fn get_block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| eyre!("eth_blockNumber returned {}", result))?;
        crate::utils::parse_hex_to_u64(hex)
    }

    /// The block, or `None` when the node does not have it yet.
    pub async fn get_block_by_number(&self, block_number: u64) -> Result<Option<RpcBlock>> {
        let block = format!("0x{:x}", block_number);
        let result = self
            .call("eth_getBlockByNumber", json!([block, false]))
            .await?;

        if result.is_null() {
            debug!(block_number, "Block not available yet");
            return Ok(None);
        }

        json_to_block(&result).map(Some)
    }

    /// Blocks `from_block..=to_block` the node already has, in order.
    pub async fn get_blocks_in_range(&self, from_block: u64, to_block: u64) -> Result<Vec<RpcBlock>> {
        let mut blocks = Vec::new();

        info!("Fetching blocks from {} to {}", from_block, to_block);

        for block_number in from_block..=to_block {
            match self.get_block_by_number(block_number).await? {
                Some(block) => blocks.push(block),
                None => break,
            }
            if blocks.len() % 64 == 0 && !blocks.is_empty() {
                info!("Fetched {} blocks", blocks.len());
            }
        }

        Ok(blocks)
    }
}
