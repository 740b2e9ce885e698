#![deny(unused_crate_dependencies)]
use tokio as _;

pub mod models;
pub mod queries;
pub mod rpc;
pub mod schema;
pub mod utils;

use eyre::{eyre, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Arc;

#[derive(Debug)]
pub struct DbConnection {
    pub pool: Pool<Postgres>,
}

// Use Arc to allow thread-safe cloning
impl DbConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Arc<Self>> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| eyre!("Failed to connect to database: {}", e))?;

        Ok(Arc::new(Self { pool }))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
