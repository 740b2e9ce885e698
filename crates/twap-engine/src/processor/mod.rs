//! Batch processors: drive the aggregation over incoming blocks and persist
//! the results, one variant per confirmation status.

pub mod confirmed;
pub mod unconfirmed;

pub use confirmed::ConfirmedProcessor;
pub use unconfirmed::UnconfirmedProcessor;

use async_trait::async_trait;

use crate::aggregation::Aggregator;
use crate::error::TwapError;
use crate::resilience::RetryPolicy;
use crate::types::{BlockObservation, ConfirmationStatus};
use crate::window::WindowCatalog;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchMode {
    /// Fold the newest block even if nothing after it is known yet, closing
    /// its interval with the nominal block time.
    pub accept_open_tail: bool,
}

impl BatchMode {
    pub const TERMINAL: BatchMode = BatchMode {
        accept_open_tail: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Everything that could be folded was persisted.
    Applied { checkpoint: Option<u64> },
    /// The feed is inconsistent with the stored checkpoint; the runner must
    /// call [`BatchProcessor::recalibrate`] and catch up again.
    Recalibrate,
}

#[async_trait]
pub trait BatchProcessor: Send {
    fn status(&self) -> ConfirmationStatus;

    /// Last block durably folded into every window.
    fn checkpoint(&self) -> Option<u64>;

    /// First block the processor has not seen yet, if it has seen any.
    fn next_block(&self) -> Option<u64>;

    async fn process_batch(
        &mut self,
        blocks: &[BlockObservation],
        mode: BatchMode,
    ) -> Result<BatchOutcome, TwapError>;

    async fn recalibrate(&mut self) -> Result<(), TwapError>;
}

/// Settings shared by both processors.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub catalog: WindowCatalog,
    pub aggregator: Aggregator,
    pub retry: RetryPolicy,
}

pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Drops blocks at or below `checkpoint` and any block that does not move
/// both number and timestamp forward.
pub(crate) fn fresh_blocks(
    checkpoint: Option<u64>,
    blocks: impl IntoIterator<Item = BlockObservation>,
) -> Vec<BlockObservation> {
    let mut fresh: Vec<BlockObservation> = Vec::new();
    for block in blocks {
        if checkpoint.is_some_and(|c| block.number <= c) {
            continue;
        }
        if let Some(last) = fresh.last() {
            if block.number <= last.number || block.timestamp <= last.timestamp {
                tracing::warn!(
                    "Dropping out-of-order block {} (ts {}) after block {} (ts {})",
                    block.number,
                    block.timestamp,
                    last.number,
                    last.timestamp
                );
                continue;
            }
        }
        fresh.push(block);
    }
    fresh
}
