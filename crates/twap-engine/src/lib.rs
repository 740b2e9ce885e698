//! # TWAP Engine
//!
//! `twap_engine` maintains time-weighted average base fees over a set of
//! trailing windows, folding new block observations into persisted aggregate
//! state as they arrive.
//!
//! ## Modules
//!
//! - `aggregation`: the pure fold from observations to `TwapState`.
//! - `window`: the catalog of tracked windows.
//! - `source`: the block source port and the polling subscription.
//! - `store`: the aggregate store port and its transaction.
//! - `processor`: the confirmed and unconfirmed batch processors.
//! - `runner`: catch-up and live-tail loop driving one processor.
//! - `resilience`: retry policy with an injectable sleeper.
//!
//! ## Example
//!
//! ```rust
//! use twap_engine::aggregation::{Aggregator, OpenInterval};
//! use twap_engine::types::BlockObservation;
//! use twap_engine::window::{WindowId, WindowSpec};
//!
//! let window = WindowSpec::new(WindowId::TwelveMin, 24);
//! let blocks = [
//!     BlockObservation::new(1, 1000, Some(1.0)),
//!     BlockObservation::new(2, 1012, Some(2.0)),
//!     BlockObservation::new(3, 1024, Some(3.0)),
//! ];
//!
//! let state = Aggregator::default().fold(None, &window, &blocks, OpenInterval::Nominal, 0);
//! assert_eq!(state.twap_value(), 3.0);
//! ```

pub mod aggregation;
pub mod error;
pub mod processor;
pub mod resilience;
pub mod runner;
pub mod source;
pub mod store;
pub mod types;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ConfigError, SourceError, StoreError, TwapError};
