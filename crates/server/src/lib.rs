#![deny(unused_crate_dependencies)]
use time as _;

pub mod adapters;
pub mod config;
pub mod service;
pub mod telemetry;
