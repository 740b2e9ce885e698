use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{fresh_blocks, unix_now, BatchMode, BatchOutcome, BatchProcessor, ProcessorSettings};
use crate::aggregation::OpenInterval;
use crate::error::TwapError;
use crate::source::BlockSource;
use crate::store::AggregateStore;
use crate::types::{BlockObservation, BlockTwap, CommittedRange, ConfirmationStatus, TwapState};

const STATUS: ConfirmationStatus = ConfirmationStatus::Confirmed;

/// Folds finalized blocks from the archive.
///
/// Every batch is one transaction: block rows, per-block snapshots, the new
/// state of every window and the change notification either all land or none
/// do. Each window is rebuilt from the stored confirmed history rather than
/// added to, so this pipeline carries no drift. A failed batch is retried
/// unchanged up to the policy's bound, then handed back to the runner.
pub struct ConfirmedProcessor {
    store: Arc<dyn AggregateStore>,
    source: Arc<dyn BlockSource>,
    settings: ProcessorSettings,
    checkpoint: Option<u64>,
    deferred: Option<BlockObservation>,
}

/// What one attempt managed to persist.
struct Committed {
    last: Option<BlockObservation>,
    deferred: Option<BlockObservation>,
}

impl ConfirmedProcessor {
    pub async fn load(
        store: Arc<dyn AggregateStore>,
        source: Arc<dyn BlockSource>,
        settings: ProcessorSettings,
    ) -> Result<Self, TwapError> {
        let checkpoint = store.last_checkpoint(STATUS).await?;
        info!(?checkpoint, windows = settings.catalog.len(), "Loaded confirmed TWAP state");

        Ok(Self {
            store,
            source,
            settings,
            checkpoint,
            deferred: None,
        })
    }

    /// Splits off the block whose interval cannot be closed yet and returns
    /// the blocks to fold with the rule for closing the last one.
    async fn close_tail(
        &self,
        blocks: &[BlockObservation],
        mode: BatchMode,
    ) -> Result<(usize, OpenInterval), TwapError> {
        let Some(newest) = blocks.last() else {
            return Ok((0, OpenInterval::Nominal));
        };

        match self.source.successor_timestamp(newest.number).await? {
            Some(timestamp) => Ok((blocks.len(), OpenInterval::Successor(timestamp))),
            None if mode.accept_open_tail => Ok((blocks.len(), OpenInterval::Nominal)),
            None => {
                debug!(block = newest.number, "No successor archived yet, deferring block");
                Ok((blocks.len() - 1, OpenInterval::Successor(newest.timestamp)))
            }
        }
    }

    async fn try_apply(
        &self,
        blocks: &[BlockObservation],
        mode: BatchMode,
    ) -> Result<Committed, TwapError> {
        let (fold_len, open) = self.close_tail(blocks, mode).await?;
        let (folded, rest) = blocks.split_at(fold_len);
        let deferred = rest.first().copied();

        let (Some(first), Some(last)) = (folded.first(), folded.last()) else {
            return Ok(Committed {
                last: None,
                deferred,
            });
        };

        let catalog = &self.settings.catalog;
        let mut tx = self.store.begin().await?;

        let mut priors = Vec::with_capacity(catalog.len());
        for window in catalog.iter() {
            priors.push(tx.lock_state(window.id, STATUS).await?);
        }

        tx.put_blocks(STATUS, folded).await?;

        let from_timestamp = first
            .timestamp
            .saturating_sub(catalog.longest_duration());
        let history = tx.history(STATUS, from_timestamp, last.number).await?;
        let timeline = self.settings.aggregator.timeline(&history, open);

        let mut snapshots = Vec::with_capacity(folded.len() * catalog.len());
        for (window, prior) in catalog.iter().zip(priors) {
            if let Some(prior) = prior {
                if prior.last_block_number() + 1 < first.number {
                    warn!(
                        window = %window.id,
                        previous = prior.last_block_number(),
                        next = first.number,
                        "Confirmed archive skips blocks"
                    );
                }
            }

            for block in folded {
                if let Some(k) = timeline.index_of(block.number) {
                    snapshots.push(BlockTwap {
                        block_number: block.number,
                        window: window.id,
                        twap_value: timeline.state_at(window, k).twap_value(),
                    });
                }
            }

            let state = match timeline.last_index() {
                Some(k) => timeline.state_at(window, k),
                None => prior.unwrap_or_else(|| TwapState::zero(unix_now())),
            }
            .with_checkpoint(last.number, last.timestamp);

            tx.put_state(window.id, STATUS, &state).await?;
            debug!(
                window = %window.id,
                twap = state.twap_value(),
                block = last.number,
                "Rebuilt confirmed window"
            );
        }

        tx.put_snapshots(STATUS, &snapshots).await?;
        tx.notify(&CommittedRange {
            start_timestamp: first.timestamp,
            end_timestamp: last.timestamp,
        })
        .await?;
        tx.commit().await?;

        Ok(Committed {
            last: Some(*last),
            deferred,
        })
    }
}

#[async_trait]
impl BatchProcessor for ConfirmedProcessor {
    fn status(&self) -> ConfirmationStatus {
        STATUS
    }

    fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    fn next_block(&self) -> Option<u64> {
        self.deferred
            .map(|b| b.number)
            .or(self.checkpoint)
            .map(|n| n + 1)
    }

    #[instrument(skip(self, blocks), fields(len = blocks.len()))]
    async fn process_batch(
        &mut self,
        blocks: &[BlockObservation],
        mode: BatchMode,
    ) -> Result<BatchOutcome, TwapError> {
        let candidates = self.deferred.take().into_iter().chain(blocks.iter().copied());
        let batch = fresh_blocks(self.checkpoint, candidates);
        for block in batch.iter().filter(|b| b.fee().is_none()) {
            debug!(block = block.number, "Block has no base fee, skipping it in averages");
        }

        let Some(newest) = batch.last().map(|b| b.number) else {
            return Ok(BatchOutcome::Applied {
                checkpoint: self.checkpoint,
            });
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_apply(&batch, mode).await {
                Ok(committed) => {
                    if let Some(last) = committed.last {
                        info!(
                            from = batch[0].number,
                            to = last.number,
                            "Committed confirmed TWAP batch"
                        );
                        self.checkpoint = Some(last.number);
                    }
                    self.deferred = committed.deferred;
                    return Ok(BatchOutcome::Applied {
                        checkpoint: self.checkpoint,
                    });
                }
                Err(e) if self.settings.retry.allows_retry(attempts) => {
                    warn!(attempt = attempts, "Confirmed batch failed, rolling back and retrying: {}", e);
                    self.settings.retry.wait().await;
                }
                Err(e) => {
                    error!(attempts, "Confirmed batch ending at block {} failed: {}", newest, e);
                    return Err(TwapError::RetriesExhausted {
                        status: STATUS,
                        last_block: newest,
                        attempts,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    async fn recalibrate(&mut self) -> Result<(), TwapError> {
        self.deferred = None;
        self.checkpoint = self.store.last_checkpoint(STATUS).await?;
        info!(checkpoint = ?self.checkpoint, "Reloaded confirmed checkpoint");
        Ok(())
    }
}
