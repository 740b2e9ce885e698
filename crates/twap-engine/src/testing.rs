//! In-memory doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{SourceError, StoreError};
use crate::resilience::Sleeper;
use crate::source::BlockSource;
use crate::store::{AggregateStore, CheckpointAdvance, StoreTransaction};
use crate::types::{BlockObservation, BlockTwap, CommittedRange, ConfirmationStatus, TwapState};
use crate::window::WindowId;

#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: AtomicU32,
    total_ms: AtomicU64,
}

impl RecordingSleeper {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Default, Clone)]
pub struct Tables {
    pub blocks: BTreeMap<u64, (BlockObservation, bool)>,
    pub states: HashMap<(WindowId, ConfirmationStatus), TwapState>,
    pub snapshots: BTreeMap<(u64, WindowId, ConfirmationStatus), f64>,
    pub notifications: Vec<CommittedRange>,
}

/// Store whose transactions stage a full copy of the tables and swap it in on
/// commit. Commits can be made to fail on demand.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failing_commits: Arc<AtomicU32>,
    commits: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn fail_next_commits(&self, count: u32) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn commits(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Tables {
        self.tables.lock().unwrap().clone()
    }

    pub fn state(&self, window: WindowId, status: ConfirmationStatus) -> Option<TwapState> {
        self.tables.lock().unwrap().states.get(&(window, status)).copied()
    }

    pub fn seed_state(&self, window: WindowId, status: ConfirmationStatus, state: TwapState) {
        self.tables
            .lock()
            .unwrap()
            .states
            .insert((window, status), state);
    }

    pub fn seed_blocks(&self, confirmed: bool, blocks: &[BlockObservation]) {
        let mut tables = self.tables.lock().unwrap();
        for block in blocks {
            tables.blocks.insert(block.number, (*block, confirmed));
        }
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            staged: self.snapshot(),
            store: self.clone(),
        }))
    }

    async fn last_checkpoint(&self, status: ConfirmationStatus) -> Result<Option<u64>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .states
            .iter()
            .filter(|((_, s), _)| *s == status)
            .map(|(_, state)| state.last_block_number())
            .min())
    }

    async fn latest_confirmed_block(&self) -> Result<Option<BlockObservation>, StoreError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .blocks
            .values()
            .rev()
            .find(|(_, confirmed)| *confirmed)
            .map(|(block, _)| *block))
    }
}

pub struct MemoryTransaction {
    staged: Tables,
    store: MemoryStore,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_state(
        &mut self,
        window: WindowId,
        status: ConfirmationStatus,
    ) -> Result<Option<TwapState>, StoreError> {
        Ok(self.staged.states.get(&(window, status)).copied())
    }

    async fn put_state(
        &mut self,
        window: WindowId,
        status: ConfirmationStatus,
        state: &TwapState,
    ) -> Result<CheckpointAdvance, StoreError> {
        let previous = self
            .staged
            .states
            .get(&(window, status))
            .map(|s| s.last_block_number());
        if let Some(current) = previous {
            if state.last_block_number() < current {
                return Err(StoreError::CheckpointRegression {
                    window,
                    status,
                    current,
                    attempted: state.last_block_number(),
                });
            }
        }
        self.staged.states.insert((window, status), *state);
        Ok(CheckpointAdvance::between(previous, state.last_block_number()))
    }

    async fn put_blocks(
        &mut self,
        status: ConfirmationStatus,
        blocks: &[BlockObservation],
    ) -> Result<(), StoreError> {
        for block in blocks {
            let keep_confirmed = matches!(
                self.staged.blocks.get(&block.number),
                Some((_, true)) if !status.is_confirmed()
            );
            if !keep_confirmed {
                self.staged
                    .blocks
                    .insert(block.number, (*block, status.is_confirmed()));
            }
        }
        Ok(())
    }

    async fn put_snapshots(
        &mut self,
        status: ConfirmationStatus,
        snapshots: &[BlockTwap],
    ) -> Result<(), StoreError> {
        for snapshot in snapshots {
            self.staged.snapshots.insert(
                (snapshot.block_number, snapshot.window, status),
                snapshot.twap_value,
            );
        }
        Ok(())
    }

    async fn history(
        &mut self,
        status: ConfirmationStatus,
        from_timestamp: u64,
        up_to_number: u64,
    ) -> Result<Vec<BlockObservation>, StoreError> {
        let visible: Vec<BlockObservation> = self
            .staged
            .blocks
            .range(..=up_to_number)
            .filter(|(_, (block, confirmed))| {
                block.fee().is_some() && (*confirmed || !status.is_confirmed())
            })
            .map(|(_, (block, _))| *block)
            .collect();

        let split = visible.partition_point(|b| b.timestamp < from_timestamp);
        let start = split.saturating_sub(1);
        Ok(visible[start..].to_vec())
    }

    async fn notify(&mut self, range: &CommittedRange) -> Result<(), StoreError> {
        self.staged.notifications.push(*range);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { staged, store } = *self;
        let pending_failures = store.failing_commits.load(Ordering::SeqCst);
        if pending_failures > 0 {
            store
                .failing_commits
                .store(pending_failures - 1, Ordering::SeqCst);
            return Err(StoreError::Corrupt("injected commit failure".into()));
        }
        *store.tables.lock().unwrap() = staged;
        store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Block source over a fixed, growable chain.
#[derive(Debug, Default, Clone)]
pub struct FakeChain {
    blocks: Arc<Mutex<BTreeMap<u64, BlockObservation>>>,
    failing_heads: Arc<AtomicU32>,
}

impl FakeChain {
    pub fn new(blocks: &[BlockObservation]) -> Self {
        let chain = Self::default();
        chain.extend(blocks);
        chain
    }

    pub fn extend(&self, blocks: &[BlockObservation]) {
        let mut map = self.blocks.lock().unwrap();
        for block in blocks {
            map.insert(block.number, *block);
        }
    }

    pub fn fail_next_heads(&self, count: u32) {
        self.failing_heads.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlockSource for FakeChain {
    async fn head_number(&self) -> Result<u64, SourceError> {
        let failures = self.failing_heads.load(Ordering::SeqCst);
        if failures > 0 {
            self.failing_heads.store(failures - 1, Ordering::SeqCst);
            return Err(SourceError::Malformed("injected head failure".into()));
        }
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default())
    }

    async fn range(&self, from: u64, max_count: u64) -> Result<Vec<BlockObservation>, SourceError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .range(from..)
            .take(max_count as usize)
            .map(|(_, block)| *block)
            .collect())
    }

    async fn successor_timestamp(&self, number: u64) -> Result<Option<u64>, SourceError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .range(number + 1..)
            .map(|(_, block)| block)
            .find(|block| block.fee().is_some())
            .map(|block| block.timestamp))
    }
}

/// `count` blocks from `first`, 12 seconds apart, fee equal to the offset + 1.
pub fn chain(first: u64, count: u64, first_timestamp: u64) -> Vec<BlockObservation> {
    (0..count)
        .map(|i| BlockObservation::new(first + i, first_timestamp + 12 * i, Some((i + 1) as f64)))
        .collect()
}
