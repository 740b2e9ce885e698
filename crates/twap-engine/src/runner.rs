//! Drives one processor against one block source.
//!
//! The runner alternates between two states. While catching up it pages
//! through the gap between the processor's checkpoint and the source head,
//! refetching the head until nothing is left to close. While live-tailing it
//! feeds blocks from a polling subscription one at a time. A recalibration
//! request, or a processor error, sends it back to catching up.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::processor::{BatchMode, BatchOutcome, BatchProcessor};
use crate::resilience::{Sleeper, TokioSleeper};
use crate::source::{BlockSource, BlockSubscription};

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// First block to fetch when the processor has no checkpoint.
    pub initial_block: u64,
    /// Page size while catching up, and per poll while live-tailing.
    pub batch_size: u64,
    pub poll_interval: Duration,
    /// Pause after a failed fetch or batch.
    pub retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            initial_block: 0,
            batch_size: 1000,
            poll_interval: Duration::from_secs(12),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Stops every runner subscribed to it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Nothing left to fetch.
    Done,
    /// Stored state needs to be rebuilt before continuing.
    Recalibrate,
    /// Fall back to catching up.
    Resync,
    Stopped,
}

pub struct Runner<S: ?Sized, P> {
    source: Arc<S>,
    processor: P,
    config: RunnerConfig,
    shutdown: watch::Receiver<bool>,
    sleeper: Arc<dyn Sleeper>,
}

impl<S, P> Runner<S, P>
where
    S: BlockSource + ?Sized + 'static,
    P: BatchProcessor,
{
    pub fn new(
        source: Arc<S>,
        processor: P,
        config: RunnerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            processor,
            config,
            shutdown,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn next_block(&self) -> u64 {
        self.processor
            .next_block()
            .unwrap_or(self.config.initial_block)
    }

    /// Catches up, then live-tails, until shutdown.
    pub async fn start(&mut self) {
        let status = self.processor.status();
        info!(%status, next = self.next_block(), "Starting TWAP runner");

        loop {
            let step = match self.catch_up(BatchMode::default()).await {
                Step::Done => self.live_tail().await,
                other => other,
            };

            match step {
                Step::Stopped => break,
                Step::Recalibrate => self.recalibrate().await,
                Step::Done | Step::Resync => {}
            }
        }

        info!(%status, checkpoint = ?self.processor.checkpoint(), "TWAP runner stopped");
    }

    /// One terminal catch-up: the newest block is folded even if nothing
    /// follows it yet. Returns once the gap is closed or on shutdown.
    pub async fn catch_up_only(&mut self) {
        loop {
            match self.catch_up(BatchMode::TERMINAL).await {
                Step::Recalibrate => self.recalibrate().await,
                Step::Done | Step::Stopped => break,
                Step::Resync => {}
            }
        }
    }

    async fn catch_up(&mut self, mode: BatchMode) -> Step {
        loop {
            if self.is_shutdown() {
                return Step::Stopped;
            }

            let head = match self.source.head_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("Failed to fetch chain head, retrying: {}", e);
                    self.sleeper.sleep(self.config.retry_delay).await;
                    continue;
                }
            };

            let next = self.next_block();
            if next > head {
                return Step::Done;
            }

            let count = (head - next + 1).min(self.config.batch_size.max(1));
            let blocks = match self.source.range(next, count).await {
                Ok(blocks) => blocks,
                Err(e) => {
                    warn!(from = next, count, "Failed to fetch blocks, retrying: {}", e);
                    self.sleeper.sleep(self.config.retry_delay).await;
                    continue;
                }
            };
            if blocks.is_empty() {
                return Step::Done;
            }

            info!(from = next, to = head, fetched = blocks.len(), "Catching up");
            match self.processor.process_batch(&blocks, mode).await {
                Ok(BatchOutcome::Recalibrate) => return Step::Recalibrate,
                Ok(BatchOutcome::Applied { .. }) => {
                    if self.next_block() == next {
                        return Step::Done;
                    }
                }
                Err(e) => {
                    error!("Batch failed, will retry from checkpoint: {}", e);
                    self.sleeper.sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    async fn live_tail(&mut self) -> Step {
        let from = self.next_block();
        info!(from, "Switching to live tail");

        let mut subscription = BlockSubscription::poll(
            Arc::clone(&self.source),
            from,
            self.config.poll_interval,
            self.config.batch_size,
        );
        let mut shutdown = self.shutdown.clone();

        loop {
            if self.is_shutdown() {
                subscription.unsubscribe();
                return Step::Stopped;
            }

            let block = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        subscription.unsubscribe();
                        return Step::Stopped;
                    }
                    continue;
                }
                block = subscription.next() => block,
            };
            let Some(block) = block else {
                warn!("Block subscription ended");
                return Step::Resync;
            };

            match self
                .processor
                .process_batch(std::slice::from_ref(&block), BatchMode::default())
                .await
            {
                Ok(BatchOutcome::Applied { .. }) => {}
                Ok(BatchOutcome::Recalibrate) => {
                    subscription.unsubscribe();
                    return Step::Recalibrate;
                }
                Err(e) => {
                    error!(block = block.number, "Live block failed: {}", e);
                    subscription.unsubscribe();
                    self.sleeper.sleep(self.config.retry_delay).await;
                    return Step::Resync;
                }
            }
        }
    }

    async fn recalibrate(&mut self) {
        info!(status = %self.processor.status(), "Recalibrating");
        while let Err(e) = self.processor.recalibrate().await {
            if self.is_shutdown() {
                return;
            }
            warn!("Recalibration failed, retrying: {}", e);
            self.sleeper.sleep(self.config.retry_delay).await;
        }
    }
}
