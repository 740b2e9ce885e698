use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{fresh_blocks, unix_now, BatchMode, BatchOutcome, BatchProcessor, ProcessorSettings};
use crate::aggregation::OpenInterval;
use crate::error::TwapError;
use crate::store::{AggregateStore, CheckpointAdvance};
use crate::types::{BlockObservation, BlockTwap, ConfirmationStatus, TwapState};

const STATUS: ConfirmationStatus = ConfirmationStatus::Unconfirmed;

/// Folds the live chain head one block at a time.
///
/// A block's interval is only known once the next block shows up, so the
/// newest block waits in memory until that successor arrives. It is then
/// stored and every window is rebuilt from the stored history as of that
/// block, closed at the successor's timestamp, so aged-out blocks leave the
/// average as soon as they fall out of the window. Each fold is its own
/// transaction and is retried until it succeeds.
///
/// A successor that does not directly follow the pending block, or a stored
/// checkpoint that jumps, means the live feed and the store disagree: the
/// processor asks the runner to recalibrate.
pub struct UnconfirmedProcessor {
    store: Arc<dyn AggregateStore>,
    settings: ProcessorSettings,
    checkpoint: Option<u64>,
    pending: Option<BlockObservation>,
    recalibrate_every: Option<u64>,
    folded_since_recalibration: u64,
}

enum Admission {
    Skip,
    Hold,
    Fold(BlockObservation),
    Recalibrate,
}

enum Applied {
    Folded,
    Gap(CheckpointAdvance),
}

impl UnconfirmedProcessor {
    /// Resumes from the stored unconfirmed checkpoint, or right after the
    /// newest confirmed block when there is none.
    pub async fn load(
        store: Arc<dyn AggregateStore>,
        settings: ProcessorSettings,
    ) -> Result<Self, TwapError> {
        let checkpoint = match store.last_checkpoint(STATUS).await? {
            Some(checkpoint) => Some(checkpoint),
            None => store.latest_confirmed_block().await?.map(|b| b.number),
        };
        info!(?checkpoint, windows = settings.catalog.len(), "Loaded unconfirmed TWAP state");

        Ok(Self {
            store,
            settings,
            checkpoint,
            pending: None,
            recalibrate_every: None,
            folded_since_recalibration: 0,
        })
    }

    /// Recalibrate after every `blocks` folds even without a detected gap.
    pub fn with_recalibration_interval(mut self, blocks: u64) -> Self {
        self.recalibrate_every = (blocks > 0).then_some(blocks);
        self
    }

    fn admit(&self, block: &BlockObservation) -> Admission {
        if self.checkpoint.is_some_and(|c| block.number <= c) {
            return Admission::Skip;
        }

        match self.pending {
            None => Admission::Hold,
            Some(pending) if block.number == pending.number => {
                if *block != pending {
                    debug!(
                        block = block.number,
                        previous_timestamp = pending.timestamp,
                        timestamp = block.timestamp,
                        "Pending block replaced by a reorged head"
                    );
                }
                Admission::Hold
            }
            Some(pending)
                if block.number == pending.number + 1 && block.timestamp > pending.timestamp =>
            {
                Admission::Fold(pending)
            }
            Some(pending) => {
                warn!(
                    pending = pending.number,
                    arrived = block.number,
                    "Live feed is not contiguous"
                );
                Admission::Recalibrate
            }
        }
    }

    async fn apply(
        &self,
        pending: &BlockObservation,
        next: &BlockObservation,
    ) -> Result<Applied, TwapError> {
        let catalog = &self.settings.catalog;
        let aggregator = &self.settings.aggregator;
        let open = OpenInterval::Until(next.timestamp);

        let mut tx = self.store.begin().await?;
        tx.put_blocks(STATUS, std::slice::from_ref(pending)).await?;

        let from = pending
            .timestamp
            .saturating_sub(catalog.longest_duration());
        let history = tx.history(STATUS, from, pending.number).await?;
        let timeline = aggregator.timeline(&history, open);
        let snapshot_index = timeline.index_of(pending.number);

        let mut snapshots = Vec::with_capacity(catalog.len());
        for window in catalog.iter() {
            let prior = tx.lock_state(window.id, STATUS).await?;
            if prior.is_some_and(|p| p.last_block_number() >= pending.number) {
                continue;
            }

            let state = match timeline.last_index() {
                Some(k) => timeline.state_at(window, k),
                None => prior.unwrap_or_else(|| TwapState::zero(unix_now())),
            }
            .with_checkpoint(pending.number, pending.timestamp);

            // A reseeded window may jump; a folded one must not.
            let advance = tx.put_state(window.id, STATUS, &state).await?;
            if prior.is_some_and(|p| !p.is_empty()) && advance.is_gap() {
                return Ok(Applied::Gap(advance));
            }

            if snapshot_index.is_some() {
                snapshots.push(BlockTwap {
                    block_number: pending.number,
                    window: window.id,
                    twap_value: state.twap_value(),
                });
            }
        }

        tx.put_snapshots(STATUS, &snapshots).await?;
        tx.commit().await?;
        Ok(Applied::Folded)
    }

    /// Applies one fold, retrying transient failures per the policy.
    async fn apply_with_retry(
        &self,
        pending: &BlockObservation,
        next: &BlockObservation,
    ) -> Result<Applied, TwapError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.apply(pending, next).await {
                Ok(applied) => return Ok(applied),
                Err(e) if self.settings.retry.allows_retry(attempts) => {
                    warn!(
                        block = pending.number,
                        attempt = attempts,
                        "Failed to apply unconfirmed block, retrying: {}",
                        e
                    );
                    self.settings.retry.wait().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl BatchProcessor for UnconfirmedProcessor {
    fn status(&self) -> ConfirmationStatus {
        STATUS
    }

    fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    fn next_block(&self) -> Option<u64> {
        self.pending
            .map(|b| b.number)
            .or(self.checkpoint)
            .map(|n| n + 1)
    }

    #[instrument(skip(self, blocks), fields(len = blocks.len()))]
    async fn process_batch(
        &mut self,
        blocks: &[BlockObservation],
        _mode: BatchMode,
    ) -> Result<BatchOutcome, TwapError> {
        for block in fresh_blocks(self.checkpoint, blocks.iter().copied()) {
            let pending = match self.admit(&block) {
                Admission::Skip => continue,
                Admission::Recalibrate => return Ok(BatchOutcome::Recalibrate),
                Admission::Hold => {
                    self.pending = Some(block);
                    continue;
                }
                Admission::Fold(pending) => pending,
            };

            if pending.fee().is_none() {
                debug!(block = pending.number, "Block has no base fee, skipping it in averages");
            }

            match self.apply_with_retry(&pending, &block).await? {
                Applied::Folded => {
                    debug!(block = pending.number, "Folded unconfirmed block");
                    self.checkpoint = Some(pending.number);
                    self.pending = Some(block);
                    self.folded_since_recalibration += 1;
                }
                Applied::Gap(advance) => {
                    warn!(?advance, "Stored checkpoint jumped, discarding fold");
                    return Ok(BatchOutcome::Recalibrate);
                }
            }

            if self
                .recalibrate_every
                .is_some_and(|every| self.folded_since_recalibration >= every)
            {
                info!(
                    folded = self.folded_since_recalibration,
                    "Periodic recalibration due"
                );
                return Ok(BatchOutcome::Recalibrate);
            }
        }

        Ok(BatchOutcome::Applied {
            checkpoint: self.checkpoint,
        })
    }

    /// Drops the pending block and reseeds every window to empty sums anchored
    /// at the newest block known to either pipeline. The next fold then
    /// rebuilds each window from stored history.
    async fn recalibrate(&mut self) -> Result<(), TwapError> {
        self.pending = None;
        self.folded_since_recalibration = 0;

        let mut anchor = self
            .store
            .latest_confirmed_block()
            .await?
            .map(|b| (b.number, b.timestamp));

        let mut tx = self.store.begin().await?;
        for window in self.settings.catalog.iter() {
            if let Some(state) = tx.lock_state(window.id, STATUS).await? {
                let candidate = (state.last_block_number(), state.last_block_timestamp());
                if anchor.map_or(true, |(number, _)| candidate.0 > number) {
                    anchor = Some(candidate);
                }
            }
        }

        let Some((number, timestamp)) = anchor else {
            info!("Nothing to recalibrate against yet");
            self.checkpoint = None;
            return Ok(());
        };

        let seed = TwapState::anchored(number, timestamp);
        for window in self.settings.catalog.iter() {
            tx.put_state(window.id, STATUS, &seed).await?;
        }
        tx.commit().await?;

        self.checkpoint = Some(number);
        info!(anchor = number, "Recalibrated unconfirmed windows");
        Ok(())
    }
}
