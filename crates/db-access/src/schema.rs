use sqlx::{Error, PgPool};
use tracing::info;

const STATEMENTS: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS blocks (
        block_number BIGINT PRIMARY KEY,
        timestamp BIGINT NOT NULL,
        basefee DOUBLE PRECISION,
        is_confirmed BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS blocks_timestamp_idx ON blocks (timestamp)",
    r#"
    CREATE TABLE IF NOT EXISTS twap_state (
        window_type TEXT NOT NULL,
        is_confirmed BOOLEAN NOT NULL,
        weighted_sum DOUBLE PRECISION NOT NULL,
        total_seconds BIGINT NOT NULL,
        twap_value DOUBLE PRECISION NOT NULL,
        last_block_number BIGINT NOT NULL,
        last_block_timestamp BIGINT NOT NULL,
        UNIQUE (window_type, is_confirmed)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS block_twaps (
        block_number BIGINT NOT NULL,
        window_type TEXT NOT NULL,
        is_confirmed BOOLEAN NOT NULL,
        twap_value DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (block_number, window_type, is_confirmed)
    )
    "#,
];

/// Creates the aggregate tables if they are missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Aggregate schema is in place");
    Ok(())
}
