use async_trait::async_trait;
use db_access::rpc::{EthRpcClient, RpcBlock};
use twap_engine::source::BlockSource;
use twap_engine::types::BlockObservation;
use twap_engine::SourceError;

/// Unconfirmed blocks straight from an Ethereum node.
#[derive(Debug, Clone)]
pub struct RpcBlockSource {
    client: EthRpcClient,
}

impl RpcBlockSource {
    pub fn new(client: EthRpcClient) -> Self {
        Self { client }
    }
}

fn transport(err: eyre::Report) -> SourceError {
    SourceError::Transport(err.into())
}

fn observation(block: RpcBlock) -> BlockObservation {
    BlockObservation::new(block.number, block.timestamp, block.base_fee_per_gas)
}

#[async_trait]
impl BlockSource for RpcBlockSource {
    async fn head_number(&self) -> Result<u64, SourceError> {
        self.client.get_block_number().await.map_err(transport)
    }

    /// Stops at the first block the node does not have yet.
    async fn range(&self, from: u64, max_count: u64) -> Result<Vec<BlockObservation>, SourceError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let to = from.saturating_add(max_count - 1);
        let blocks = self
            .client
            .get_blocks_in_range(from, to)
            .await
            .map_err(transport)?;

        Ok(blocks.into_iter().map(observation).collect())
    }

    /// Every post-London block carries a fee, so the successor is simply the
    /// next block.
    async fn successor_timestamp(&self, number: u64) -> Result<Option<u64>, SourceError> {
        let next = self
            .client
            .get_block_by_number(number.saturating_add(1))
            .await
            .map_err(transport)?;
        Ok(next.map(|block| block.timestamp))
    }
}
