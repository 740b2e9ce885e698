//! Pure TWAP fold.
//!
//! Each fee-bearing observation covers the interval from its own timestamp to
//! the next fee-bearing observation's timestamp. The newest observation's
//! interval is still open and is closed according to an [`OpenInterval`] rule
//! supplied by the caller. The window ends at the newest observation folded;
//! contributions are clipped so they never start before
//! `window_end - duration`.
//!
//! Two modes share those rules:
//!
//! - rebuild: sums recomputed from the full history. Once the history reaches
//!   back past the window start, contributions are also clipped at the window
//!   end and cover exactly the window duration. Before that the newest open
//!   interval counts in full and `total_seconds` is capped at the duration;
//! - incremental: the new observations' contribution added on top of a prior
//!   state. Contributions that have aged out of the window are not removed, so
//!   the running sums drift until the next rebuild.

use crate::types::{BlockObservation, TwapState};
use crate::window::WindowSpec;

pub const DEFAULT_NOMINAL_BLOCK_SECS: u64 = 12;

/// How to close the interval of the newest observation in a fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenInterval {
    /// The next known observation's timestamp, looked up in wider history.
    Successor(u64),
    /// A reference time supplied by a streaming caller.
    Until(u64),
    /// No later observation exists anywhere; use the nominal block time.
    Nominal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregator {
    nominal_block_secs: u64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_NOMINAL_BLOCK_SECS)
    }
}

impl Aggregator {
    pub fn new(nominal_block_secs: u64) -> Self {
        Self {
            nominal_block_secs: nominal_block_secs.max(1),
        }
    }

    /// End of the interval that starts at `start`.
    pub fn close(&self, start: u64, open: OpenInterval) -> u64 {
        match open {
            OpenInterval::Successor(end) | OpenInterval::Until(end) => end.max(start),
            OpenInterval::Nominal => start.saturating_add(self.nominal_block_secs),
        }
    }

    pub fn timeline(&self, history: &[BlockObservation], open: OpenInterval) -> Timeline {
        Timeline::build(self, history, open)
    }

    /// Recomputes a window from `history`, which must be ordered and must
    /// reach back at least one window duration before its newest block.
    ///
    /// The checkpoint lands on the newest observation even when it carries no
    /// fee. With no observations at all the zero state is returned.
    pub fn rebuild(
        &self,
        window: &WindowSpec,
        history: &[BlockObservation],
        open: OpenInterval,
        now: u64,
    ) -> TwapState {
        let Some(newest) = history.last() else {
            return TwapState::zero(now);
        };

        let timeline = self.timeline(history, open);
        match timeline.last_index() {
            Some(k) => timeline
                .state_at(window, k)
                .with_checkpoint(newest.number, newest.timestamp),
            None => TwapState::anchored(newest.number, newest.timestamp),
        }
    }

    /// Folds `batch` into `prior`.
    ///
    /// An absent or empty prior means there is nothing to add to, so the batch
    /// is treated as the full history and rebuilt. Otherwise only the batch's
    /// own clipped contribution is added.
    pub fn fold(
        &self,
        prior: Option<&TwapState>,
        window: &WindowSpec,
        batch: &[BlockObservation],
        open: OpenInterval,
        now: u64,
    ) -> TwapState {
        let Some(newest) = batch.last() else {
            return prior.copied().unwrap_or_else(|| TwapState::zero(now));
        };

        let prior = match prior {
            Some(state) if !state.is_empty() => state,
            _ => return self.rebuild(window, batch, open, now),
        };

        let window_start = newest.timestamp.saturating_sub(window.duration_secs);
        let mut weighted = 0.0;
        let mut seconds = 0u64;

        let fee_bearing: Vec<(u64, f64)> = batch
            .iter()
            .filter_map(|obs| obs.fee().map(|fee| (obs.timestamp, fee)))
            .collect();

        for (i, &(start, fee)) in fee_bearing.iter().enumerate() {
            let end = match fee_bearing.get(i + 1) {
                Some(&(next_start, _)) => next_start,
                None => self.close(start, open),
            };
            let clipped_start = start.max(window_start);
            if end <= clipped_start {
                continue;
            }
            let covered = end - clipped_start;
            weighted += fee * covered as f64;
            seconds += covered;
        }

        TwapState::new(
            prior.weighted_sum() + weighted,
            prior.total_seconds() + seconds,
            newest.number,
            newest.timestamp,
        )
    }
}

/// Prefix sums over an ordered history, answering the rebuilt state of any
/// window as of any fee-bearing block in it.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    numbers: Vec<u64>,
    starts: Vec<u64>,
    ends: Vec<u64>,
    fees: Vec<f64>,
    weighted_prefix: Vec<f64>,
    seconds_prefix: Vec<u64>,
}

impl Timeline {
    fn build(aggregator: &Aggregator, history: &[BlockObservation], open: OpenInterval) -> Self {
        let points: Vec<(u64, u64, f64)> = history
            .iter()
            .filter_map(|obs| obs.fee().map(|fee| (obs.number, obs.timestamp, fee)))
            .collect();

        let mut timeline = Timeline {
            numbers: Vec::with_capacity(points.len()),
            starts: Vec::with_capacity(points.len()),
            ends: Vec::with_capacity(points.len()),
            fees: Vec::with_capacity(points.len()),
            weighted_prefix: Vec::with_capacity(points.len() + 1),
            seconds_prefix: Vec::with_capacity(points.len() + 1),
        };
        timeline.weighted_prefix.push(0.0);
        timeline.seconds_prefix.push(0);

        for (i, &(number, start, fee)) in points.iter().enumerate() {
            let end = match points.get(i + 1) {
                Some(&(_, next_start, _)) => next_start.max(start),
                None => aggregator.close(start, open),
            };
            let duration = end - start;

            timeline.numbers.push(number);
            timeline.starts.push(start);
            timeline.ends.push(end);
            timeline.fees.push(fee);
            timeline
                .weighted_prefix
                .push(timeline.weighted_prefix[i] + fee * duration as f64);
            timeline
                .seconds_prefix
                .push(timeline.seconds_prefix[i] + duration);
        }

        timeline
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.len().checked_sub(1)
    }

    /// Position of a fee-bearing block in the timeline.
    pub fn index_of(&self, block_number: u64) -> Option<usize> {
        self.numbers.binary_search(&block_number).ok()
    }

    /// Rebuilt state of `window` as of the `k`-th fee-bearing block, whose
    /// timestamp is the window end.
    ///
    /// While the history does not yet reach back to the window start, block
    /// `k`'s open interval is counted in full and the total is capped at the
    /// window duration. Once it does, every interval is clipped to the window
    /// on both ends and block `k` itself contributes nothing.
    ///
    /// # Panics
    ///
    /// Panics if `k` is out of bounds.
    pub fn state_at(&self, window: &WindowSpec, k: usize) -> TwapState {
        let window_end = self.starts[k];
        let window_start = window_end.saturating_sub(window.duration_secs);
        let first = self.ends[..=k].partition_point(|&end| end <= window_start);
        let full = (first > 0 || self.starts[first] < window_start) && first < k;

        // Intervals first..last (exclusive) are summed.
        let last = if full { k } else { k + 1 };
        let mut weighted = self.weighted_prefix[last] - self.weighted_prefix[first];
        let mut covered = self.seconds_prefix[last] - self.seconds_prefix[first];

        if self.starts[first] < window_start {
            let head = window_start - self.starts[first];
            weighted -= self.fees[first] * head as f64;
            covered -= head;
        }

        TwapState::new(
            weighted.max(0.0),
            covered.min(window.duration_secs),
            self.numbers[k],
            window_end,
        )
    }
}
