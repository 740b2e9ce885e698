use serde::{Deserialize, Serialize};
use std::fmt;

use crate::window::WindowId;

/// One block as seen by the engine. A block without a base fee still
/// advances checkpoints but contributes nothing to any average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockObservation {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee: Option<f64>,
}

impl BlockObservation {
    pub fn new(number: u64, timestamp: u64, base_fee: Option<f64>) -> Self {
        Self {
            number,
            timestamp,
            base_fee,
        }
    }

    /// The base fee, if present and usable for aggregation.
    pub fn fee(&self) -> Option<f64> {
        self.base_fee.filter(|fee| fee.is_finite() && *fee >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Confirmed,
    Unconfirmed,
}

impl ConfirmationStatus {
    pub fn is_confirmed(self) -> bool {
        matches!(self, ConfirmationStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Confirmed => "confirmed",
            ConfirmationStatus::Unconfirmed => "unconfirmed",
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate for one (window, status) pair.
///
/// Fields are private so `twap_value` can only ever be the quotient of the
/// other two; every constructor derives it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TwapState {
    weighted_sum: f64,
    total_seconds: u64,
    twap_value: f64,
    last_block_number: u64,
    last_block_timestamp: u64,
}

impl TwapState {
    pub fn new(
        weighted_sum: f64,
        total_seconds: u64,
        last_block_number: u64,
        last_block_timestamp: u64,
    ) -> Self {
        Self {
            weighted_sum,
            total_seconds,
            twap_value: derive_twap(weighted_sum, total_seconds),
            last_block_number,
            last_block_timestamp,
        }
    }

    /// State for a window that has never seen a block.
    pub fn zero(now: u64) -> Self {
        Self::new(0.0, 0, 0, now)
    }

    /// Empty sums anchored at a known block. Used when reseeding.
    pub fn anchored(last_block_number: u64, last_block_timestamp: u64) -> Self {
        Self::new(0.0, 0, last_block_number, last_block_timestamp)
    }

    /// Same sums, checkpoint moved to another block.
    pub fn with_checkpoint(self, last_block_number: u64, last_block_timestamp: u64) -> Self {
        Self::new(
            self.weighted_sum,
            self.total_seconds,
            last_block_number,
            last_block_timestamp,
        )
    }

    /// True when nothing has been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.total_seconds == 0 && self.weighted_sum == 0.0
    }

    pub fn weighted_sum(&self) -> f64 {
        self.weighted_sum
    }

    pub fn total_seconds(&self) -> u64 {
        self.total_seconds
    }

    pub fn twap_value(&self) -> f64 {
        self.twap_value
    }

    pub fn last_block_number(&self) -> u64 {
        self.last_block_number
    }

    pub fn last_block_timestamp(&self) -> u64 {
        self.last_block_timestamp
    }
}

fn derive_twap(weighted_sum: f64, total_seconds: u64) -> f64 {
    if total_seconds == 0 {
        0.0
    } else {
        weighted_sum / total_seconds as f64
    }
}

/// Timestamp span of a committed confirmed batch, sent to downstream
/// listeners once the batch is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedRange {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
}

/// TWAP of one window as of one block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlockTwap {
    pub block_number: u64,
    pub window: WindowId,
    pub twap_value: f64,
}
