use async_trait::async_trait;
use db_access::models::{BlockRow, BlockTwapRow, TwapStateRow};
use db_access::{queries, DbConnection};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::debug;

use twap_engine::store::{AggregateStore, CheckpointAdvance, StoreTransaction};
use twap_engine::types::{BlockObservation, BlockTwap, CommittedRange, ConfirmationStatus, TwapState};
use twap_engine::window::WindowId;
use twap_engine::StoreError;

/// Aggregate store backed by the `blocks`, `twap_state` and `block_twaps`
/// tables.
#[derive(Debug, Clone)]
pub struct PgAggregateStore {
    db: Arc<DbConnection>,
}

impl PgAggregateStore {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.db.pool.begin().await.map_err(StoreError::backend)?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn last_checkpoint(&self, status: ConfirmationStatus) -> Result<Option<u64>, StoreError> {
        queries::get_min_checkpoint(&self.db.pool, status.is_confirmed())
            .await
            .map_err(StoreError::backend)?
            .map(|n| to_u64("last_block_number", n))
            .transpose()
    }

    async fn latest_confirmed_block(&self) -> Result<Option<BlockObservation>, StoreError> {
        queries::get_latest_confirmed_block(&self.db.pool)
            .await
            .map_err(StoreError::backend)?
            .map(observation_from_row)
            .transpose()
    }
}

pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_state(
        &mut self,
        window: WindowId,
        status: ConfirmationStatus,
    ) -> Result<Option<TwapState>, StoreError> {
        queries::lock_twap_state(&mut *self.tx, window.as_str(), status.is_confirmed())
            .await
            .map_err(StoreError::backend)?
            .map(|row| state_from_row(&row))
            .transpose()
    }

    async fn put_state(
        &mut self,
        window: WindowId,
        status: ConfirmationStatus,
        state: &TwapState,
    ) -> Result<CheckpointAdvance, StoreError> {
        let previous = self
            .lock_state(window, status)
            .await?
            .map(|s| s.last_block_number());
        let next = state.last_block_number();

        if let Some(current) = previous.filter(|current| *current > next) {
            return Err(StoreError::CheckpointRegression {
                window,
                status,
                current,
                attempted: next,
            });
        }

        let row = TwapStateRow {
            window_type: window.as_str().to_string(),
            is_confirmed: status.is_confirmed(),
            weighted_sum: state.weighted_sum(),
            total_seconds: to_i64("total_seconds", state.total_seconds())?,
            twap_value: state.twap_value(),
            last_block_number: to_i64("last_block_number", next)?,
            last_block_timestamp: to_i64("last_block_timestamp", state.last_block_timestamp())?,
        };
        queries::upsert_twap_state(&mut *self.tx, &row)
            .await
            .map_err(StoreError::backend)?;

        Ok(CheckpointAdvance::between(previous, next))
    }

    async fn put_blocks(
        &mut self,
        status: ConfirmationStatus,
        blocks: &[BlockObservation],
    ) -> Result<(), StoreError> {
        let rows = blocks
            .iter()
            .map(|block| {
                Ok(BlockRow {
                    block_number: to_i64("block_number", block.number)?,
                    timestamp: to_i64("timestamp", block.timestamp)?,
                    basefee: block.fee(),
                    is_confirmed: status.is_confirmed(),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        queries::upsert_blocks(&mut *self.tx, &rows)
            .await
            .map_err(StoreError::backend)
    }

    async fn put_snapshots(
        &mut self,
        status: ConfirmationStatus,
        snapshots: &[BlockTwap],
    ) -> Result<(), StoreError> {
        let rows = snapshots
            .iter()
            .map(|snapshot| {
                Ok(BlockTwapRow {
                    block_number: to_i64("block_number", snapshot.block_number)?,
                    window_type: snapshot.window.as_str().to_string(),
                    is_confirmed: status.is_confirmed(),
                    twap_value: snapshot.twap_value,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        queries::upsert_block_twaps(&mut *self.tx, &rows)
            .await
            .map_err(StoreError::backend)
    }

    async fn history(
        &mut self,
        status: ConfirmationStatus,
        from_timestamp: u64,
        up_to_number: u64,
    ) -> Result<Vec<BlockObservation>, StoreError> {
        let rows = queries::get_fee_history(
            &mut *self.tx,
            !status.is_confirmed(),
            to_i64("from_timestamp", from_timestamp)?,
            to_i64("up_to_number", up_to_number)?,
        )
        .await
        .map_err(StoreError::backend)?;

        debug!(rows = rows.len(), %status, from_timestamp, up_to_number, "Loaded fee history");
        rows.into_iter().map(observation_from_row).collect()
    }

    async fn notify(&mut self, range: &CommittedRange) -> Result<(), StoreError> {
        let payload = serde_json::to_string(range).map_err(StoreError::backend)?;
        queries::notify_confirmed_insert(&mut *self.tx, &payload)
            .await
            .map_err(StoreError::backend)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::backend)
    }
}

fn to_u64(field: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {}: {}", field, value)))
}

fn to_i64(field: &str, value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} out of range: {}", field, value)))
}

fn state_from_row(row: &TwapStateRow) -> Result<TwapState, StoreError> {
    // The stored twap_value is recomputed from the sums.
    Ok(TwapState::new(
        row.weighted_sum,
        to_u64("total_seconds", row.total_seconds)?,
        to_u64("last_block_number", row.last_block_number)?,
        to_u64("last_block_timestamp", row.last_block_timestamp)?,
    ))
}

fn observation_from_row(row: BlockRow) -> Result<BlockObservation, StoreError> {
    Ok(BlockObservation::new(
        to_u64("block_number", row.block_number)?,
        to_u64("timestamp", row.timestamp)?,
        row.basefee,
    ))
}
