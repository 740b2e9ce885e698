use async_trait::async_trait;
use db_access::models::BlockHeaderSubset;
use db_access::utils::hex_string_to_f64;
use db_access::{queries, DbConnection};
use std::sync::Arc;
use tracing::warn;

use twap_engine::source::BlockSource;
use twap_engine::types::BlockObservation;
use twap_engine::SourceError;

/// Confirmed headers from the Fossil `blockheaders` archive.
#[derive(Debug, Clone)]
pub struct FossilBlockSource {
    db: Arc<DbConnection>,
}

impl FossilBlockSource {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }
}

fn to_i64(value: u64) -> Result<i64, SourceError> {
    i64::try_from(value).map_err(|_| SourceError::Malformed(format!("block number {} out of range", value)))
}

/// `None` for headers without a timestamp. A fee that does not parse is
/// treated as missing.
fn observation_from_header(header: &BlockHeaderSubset) -> Option<BlockObservation> {
    let number = u64::try_from(header.number).ok()?;
    let Some(timestamp) = header.timestamp.and_then(|t| u64::try_from(t).ok()) else {
        warn!(block_number = header.number, "Skipping header without a timestamp");
        return None;
    };

    let base_fee = header.base_fee_per_gas.as_deref().and_then(|hex| {
        hex_string_to_f64(hex)
            .map_err(|e| warn!(block_number = header.number, "Ignoring base fee: {}", e))
            .ok()
    });

    Some(BlockObservation::new(number, timestamp, base_fee))
}

#[async_trait]
impl BlockSource for FossilBlockSource {
    async fn head_number(&self) -> Result<u64, SourceError> {
        let head = queries::get_latest_block_number(&self.db.pool)
            .await
            .map_err(SourceError::transport)?;
        Ok(head.and_then(|n| u64::try_from(n).ok()).unwrap_or(0))
    }

    async fn range(&self, from: u64, max_count: u64) -> Result<Vec<BlockObservation>, SourceError> {
        let headers = queries::get_base_fees_from_block(
            &self.db.pool,
            to_i64(from)?,
            i64::try_from(max_count).unwrap_or(i64::MAX),
        )
        .await
        .map_err(SourceError::transport)?;

        Ok(headers.iter().filter_map(observation_from_header).collect())
    }

    async fn successor_timestamp(&self, number: u64) -> Result<Option<u64>, SourceError> {
        let timestamp = queries::get_next_base_fee_timestamp(&self.db.pool, to_i64(number)?)
            .await
            .map_err(SourceError::transport)?;
        Ok(timestamp.and_then(|t| u64::try_from(t).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::TestContext;

    #[test]
    fn test_header_conversion() {
        let header = BlockHeaderSubset {
            number: 20_000_000,
            base_fee_per_gas: Some("0x3b9aca00".to_string()),
            timestamp: Some(1_700_000_000),
        };
        assert_eq!(
            observation_from_header(&header),
            Some(BlockObservation::new(20_000_000, 1_700_000_000, Some(1_000_000_000.0)))
        );

        let garbled = BlockHeaderSubset {
            base_fee_per_gas: Some("0xnope".to_string()),
            ..header.clone()
        };
        assert_eq!(observation_from_header(&garbled).and_then(|b| b.base_fee), None);

        let undated = BlockHeaderSubset {
            timestamp: None,
            ..header
        };
        assert_eq!(observation_from_header(&undated), None);
    }

    #[tokio::test]
    #[ignore = "requires a local docker daemon"]
    async fn test_reads_headers_in_order() {
        let ctx = TestContext::new().await;
        ctx.insert_header(10, Some(1000), Some("0x1")).await;
        ctx.insert_header(11, Some(1012), None).await;
        ctx.insert_header(13, Some(1036), Some("0x3")).await;
        let source = FossilBlockSource::new(ctx.db.clone());

        assert_eq!(source.head_number().await.unwrap(), 13);
        assert_eq!(
            source.range(10, 5).await.unwrap(),
            vec![
                BlockObservation::new(10, 1000, Some(1.0)),
                BlockObservation::new(11, 1012, None),
                BlockObservation::new(13, 1036, Some(3.0)),
            ]
        );
        assert_eq!(source.range(11, 1).await.unwrap().len(), 1);
        assert_eq!(source.successor_timestamp(10).await.unwrap(), Some(1036));
        assert_eq!(source.successor_timestamp(13).await.unwrap(), None);
    }
}
