use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::types::BlockObservation;

/// Where blocks come from: the finalized archive or a live node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Number of the newest block the source knows about.
    async fn head_number(&self) -> Result<u64, SourceError>;

    /// Up to `max_count` blocks numbered `from` or higher, ascending.
    /// Numbers missing from the source are skipped, not padded.
    async fn range(&self, from: u64, max_count: u64) -> Result<Vec<BlockObservation>, SourceError>;

    /// Timestamp of the first fee-bearing block after `number`, if the source
    /// already has one.
    async fn successor_timestamp(&self, number: u64) -> Result<Option<u64>, SourceError>;
}

/// Live feed of new blocks built by polling a [`BlockSource`].
///
/// The polling task owns the cursor; blocks are delivered in order through a
/// bounded channel. Dropping the subscription stops the task.
#[derive(Debug)]
pub struct BlockSubscription {
    receiver: mpsc::Receiver<BlockObservation>,
    task: JoinHandle<()>,
}

impl BlockSubscription {
    pub fn poll<S>(source: Arc<S>, from: u64, interval: Duration, page: u64) -> Self
    where
        S: BlockSource + ?Sized + 'static,
    {
        let page = page.max(1);
        let (sender, receiver) = mpsc::channel(page as usize);

        let task = tokio::spawn(async move {
            let mut next = from;
            loop {
                match source.range(next, page).await {
                    Ok(blocks) => {
                        let full_page = blocks.len() as u64 >= page;
                        for block in blocks {
                            if block.number < next {
                                continue;
                            }
                            next = block.number + 1;
                            if sender.send(block).await.is_err() {
                                debug!("Block subscription receiver dropped, stopping poller");
                                return;
                            }
                        }
                        if full_page {
                            continue;
                        }
                    }
                    Err(e) => warn!("Polling for blocks from {} failed: {}", next, e),
                }
                tokio::time::sleep(interval).await;
            }
        });

        Self { receiver, task }
    }

    /// Next block, or `None` once the poller has stopped.
    pub async fn next(&mut self) -> Option<BlockObservation> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
