use thiserror::Error;

use crate::types::ConfirmationStatus;
use crate::window::WindowId;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while building the startup configuration. These are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No window was configured.
    #[error("at least one TWAP window must be configured")]
    EmptyCatalog,

    /// A window was given a zero duration.
    #[error("window {0} must have a positive duration")]
    ZeroDuration(WindowId),

    /// The same window id appears twice.
    #[error("window {0} is configured more than once")]
    DuplicateWindow(WindowId),

    /// A window id outside the supported set.
    #[error("unknown window identifier: {0}")]
    UnknownWindow(String),

    /// A required setting is absent.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A setting could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Errors reported by an aggregate store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistence backend failed. Always treated as transient.
    #[error("store backend error: {0}")]
    Backend(#[source] BoxError),

    /// A write would move a checkpoint backwards.
    #[error("refusing to move {window}/{status} checkpoint from block {current} back to {attempted}")]
    CheckpointRegression {
        window: WindowId,
        status: ConfirmationStatus,
        current: u64,
        attempted: u64,
    },

    /// A persisted row could not be mapped back into the domain.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Errors reported by a block source implementation.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network, database or timeout failure while fetching.
    #[error("block source transport error: {0}")]
    Transport(#[source] BoxError),

    /// The source answered with something that is not a block.
    #[error("malformed block data: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }
}

/// Errors surfacing at the processor and runner boundary.
#[derive(Debug, Error)]
pub enum TwapError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A confirmed batch kept failing and was handed back to the runner.
    #[error("{status} batch ending at block {last_block} failed after {attempts} attempts")]
    RetriesExhausted {
        status: ConfirmationStatus,
        last_block: u64,
        attempts: u32,
        #[source]
        source: Box<TwapError>,
    },
}
