//! Postgres and JSON-RPC implementations of the engine's ports.

mod fossil;
mod pg_store;
mod rpc;

#[cfg(test)]
mod fixtures;

pub use fossil::FossilBlockSource;
pub use pg_store::{PgAggregateStore, PgStoreTransaction};
pub use rpc::RpcBlockSource;
