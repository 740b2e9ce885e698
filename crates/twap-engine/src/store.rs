use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{BlockObservation, BlockTwap, CommittedRange, ConfirmationStatus, TwapState};
use crate::window::WindowId;

/// How a persisted checkpoint moved relative to the one it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointAdvance {
    /// No state existed for the key before.
    Initial,
    /// Same block as before.
    Unchanged,
    /// Exactly one block further.
    Contiguous,
    /// Skipped over blocks.
    Gap { previous: u64, next: u64 },
}

impl CheckpointAdvance {
    pub fn between(previous: Option<u64>, next: u64) -> Self {
        match previous {
            None => CheckpointAdvance::Initial,
            Some(previous) if previous == next => CheckpointAdvance::Unchanged,
            Some(previous) if previous + 1 == next => CheckpointAdvance::Contiguous,
            Some(previous) => CheckpointAdvance::Gap { previous, next },
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, CheckpointAdvance::Gap { .. })
    }
}

/// Durable home of the aggregates, block rows and per-block snapshots.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Lowest checkpoint across the windows stored for `status`.
    async fn last_checkpoint(&self, status: ConfirmationStatus) -> Result<Option<u64>, StoreError>;

    /// Newest confirmed block row.
    async fn latest_confirmed_block(&self) -> Result<Option<BlockObservation>, StoreError>;
}

/// Unit of atomic work against the store. Dropping it without calling
/// [`StoreTransaction::commit`] discards every write made through it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Reads a window's state, holding a row lock until the transaction ends.
    async fn lock_state(
        &mut self,
        window: WindowId,
        status: ConfirmationStatus,
    ) -> Result<Option<TwapState>, StoreError>;

    /// Upserts a window's state. Fails with
    /// [`StoreError::CheckpointRegression`] rather than move a checkpoint back.
    async fn put_state(
        &mut self,
        window: WindowId,
        status: ConfirmationStatus,
        state: &TwapState,
    ) -> Result<CheckpointAdvance, StoreError>;

    /// Upserts block rows. Unconfirmed writes never replace confirmed rows.
    async fn put_blocks(
        &mut self,
        status: ConfirmationStatus,
        blocks: &[BlockObservation],
    ) -> Result<(), StoreError>;

    async fn put_snapshots(
        &mut self,
        status: ConfirmationStatus,
        snapshots: &[BlockTwap],
    ) -> Result<(), StoreError>;

    /// Fee-bearing blocks with `timestamp >= from_timestamp` and
    /// `number <= up_to_number`, ascending, preceded by the newest fee-bearing
    /// block older than `from_timestamp` so the interval straddling the window
    /// start is not lost. Confirmed history only sees confirmed rows.
    async fn history(
        &mut self,
        status: ConfirmationStatus,
        from_timestamp: u64,
        up_to_number: u64,
    ) -> Result<Vec<BlockObservation>, StoreError>;

    /// Queues a change notification, delivered only if the transaction commits.
    async fn notify(&mut self, range: &CommittedRange) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
