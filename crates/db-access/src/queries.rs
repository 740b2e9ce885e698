use crate::models::{BlockHeaderSubset, BlockRow, BlockTwapRow, TwapStateRow};
use sqlx::{Error, PgConnection, PgPool};

// Fossil archive (read only)

pub async fn get_latest_block_number(pool: &PgPool) -> Result<Option<i64>, Error> {
    sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(number) FROM blockheaders")
        .fetch_one(pool)
        .await
}

/// Up to `limit` headers numbered `from_block` or higher.
pub async fn get_base_fees_from_block(
    pool: &PgPool,
    from_block: i64,
    limit: i64,
) -> Result<Vec<BlockHeaderSubset>, Error> {
    sqlx::query_as::<_, BlockHeaderSubset>(
        r#"
        SELECT number, base_fee_per_gas, timestamp
        FROM blockheaders
        WHERE number >= $1
        ORDER BY number ASC
        LIMIT $2
        "#,
    )
    .bind(from_block)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn get_next_base_fee_timestamp(
    pool: &PgPool,
    block_number: i64,
) -> Result<Option<i64>, Error> {
    let timestamp = sqlx::query_scalar::<_, Option<i64>>(
        r#"
        SELECT timestamp
        FROM blockheaders
        WHERE number > $1 AND base_fee_per_gas IS NOT NULL
        ORDER BY number ASC
        LIMIT 1
        "#,
    )
    .bind(block_number)
    .fetch_optional(pool)
    .await?;

    Ok(timestamp.flatten())
}

// Aggregate database

pub async fn get_min_checkpoint(pool: &PgPool, is_confirmed: bool) -> Result<Option<i64>, Error> {
    sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MIN(last_block_number) FROM twap_state WHERE is_confirmed = $1",
    )
    .bind(is_confirmed)
    .fetch_one(pool)
    .await
}

pub async fn get_latest_confirmed_block(pool: &PgPool) -> Result<Option<BlockRow>, Error> {
    sqlx::query_as::<_, BlockRow>(
        r#"
        SELECT block_number, timestamp, basefee, is_confirmed
        FROM blocks
        WHERE is_confirmed
        ORDER BY block_number DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
}

/// Reads a state row and locks it until the surrounding transaction ends.
pub async fn lock_twap_state(
    conn: &mut PgConnection,
    window_type: &str,
    is_confirmed: bool,
) -> Result<Option<TwapStateRow>, Error> {
    sqlx::query_as::<_, TwapStateRow>(
        r#"
        SELECT window_type, is_confirmed, weighted_sum, total_seconds, twap_value,
               last_block_number, last_block_timestamp
        FROM twap_state
        WHERE window_type = $1 AND is_confirmed = $2
        FOR UPDATE
        "#,
    )
    .bind(window_type)
    .bind(is_confirmed)
    .fetch_optional(conn)
    .await
}

pub async fn upsert_twap_state(conn: &mut PgConnection, row: &TwapStateRow) -> Result<(), Error> {
    sqlx::query(
        r#"
        INSERT INTO twap_state (
            window_type, is_confirmed, weighted_sum, total_seconds, twap_value,
            last_block_number, last_block_timestamp
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (window_type, is_confirmed) DO UPDATE SET
            weighted_sum = EXCLUDED.weighted_sum,
            total_seconds = EXCLUDED.total_seconds,
            twap_value = EXCLUDED.twap_value,
            last_block_number = EXCLUDED.last_block_number,
            last_block_timestamp = EXCLUDED.last_block_timestamp
        "#,
    )
    .bind(&row.window_type)
    .bind(row.is_confirmed)
    .bind(row.weighted_sum)
    .bind(row.total_seconds)
    .bind(row.twap_value)
    .bind(row.last_block_number)
    .bind(row.last_block_timestamp)
    .execute(conn)
    .await?;

    Ok(())
}

/// Upserts block rows. An unconfirmed row never replaces a confirmed one.
pub async fn upsert_blocks(conn: &mut PgConnection, rows: &[BlockRow]) -> Result<(), Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let numbers: Vec<i64> = rows.iter().map(|r| r.block_number).collect();
    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    let basefees: Vec<Option<f64>> = rows.iter().map(|r| r.basefee).collect();
    let confirmed: Vec<bool> = rows.iter().map(|r| r.is_confirmed).collect();

    sqlx::query(
        r#"
        INSERT INTO blocks (block_number, timestamp, basefee, is_confirmed)
        SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::DOUBLE PRECISION[], $4::BOOLEAN[])
        ON CONFLICT (block_number) DO UPDATE SET
            timestamp = EXCLUDED.timestamp,
            basefee = EXCLUDED.basefee,
            is_confirmed = EXCLUDED.is_confirmed
        WHERE EXCLUDED.is_confirmed OR NOT blocks.is_confirmed
        "#,
    )
    .bind(numbers)
    .bind(timestamps)
    .bind(basefees)
    .bind(confirmed)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn upsert_block_twaps(conn: &mut PgConnection, rows: &[BlockTwapRow]) -> Result<(), Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let numbers: Vec<i64> = rows.iter().map(|r| r.block_number).collect();
    let windows: Vec<String> = rows.iter().map(|r| r.window_type.clone()).collect();
    let confirmed: Vec<bool> = rows.iter().map(|r| r.is_confirmed).collect();
    let values: Vec<f64> = rows.iter().map(|r| r.twap_value).collect();

    sqlx::query(
        r#"
        INSERT INTO block_twaps (block_number, window_type, is_confirmed, twap_value)
        SELECT * FROM UNNEST($1::BIGINT[], $2::TEXT[], $3::BOOLEAN[], $4::DOUBLE PRECISION[])
        ON CONFLICT (block_number, window_type, is_confirmed) DO UPDATE SET
            twap_value = EXCLUDED.twap_value
        "#,
    )
    .bind(numbers)
    .bind(windows)
    .bind(confirmed)
    .bind(values)
    .execute(conn)
    .await?;

    Ok(())
}

/// Fee-bearing blocks from `from_timestamp` up to `up_to_block`, preceded by
/// the newest fee-bearing block before `from_timestamp`. Unconfirmed rows are
/// only visible when `include_unconfirmed` is set.
pub async fn get_fee_history(
    conn: &mut PgConnection,
    include_unconfirmed: bool,
    from_timestamp: i64,
    up_to_block: i64,
) -> Result<Vec<BlockRow>, Error> {
    sqlx::query_as::<_, BlockRow>(
        r#"
        SELECT * FROM (
            (
                SELECT block_number, timestamp, basefee, is_confirmed
                FROM blocks
                WHERE basefee IS NOT NULL
                  AND block_number <= $3
                  AND timestamp < $2
                  AND ($1 OR is_confirmed)
                ORDER BY block_number DESC
                LIMIT 1
            )
            UNION ALL
            (
                SELECT block_number, timestamp, basefee, is_confirmed
                FROM blocks
                WHERE basefee IS NOT NULL
                  AND block_number <= $3
                  AND timestamp >= $2
                  AND ($1 OR is_confirmed)
            )
        ) history
        ORDER BY block_number ASC
        "#,
    )
    .bind(include_unconfirmed)
    .bind(from_timestamp)
    .bind(up_to_block)
    .fetch_all(conn)
    .await
}

pub async fn get_block_twaps(
    pool: &PgPool,
    block_number: i64,
    is_confirmed: bool,
) -> Result<Vec<BlockTwapRow>, Error> {
    sqlx::query_as::<_, BlockTwapRow>(
        r#"
        SELECT block_number, window_type, is_confirmed, twap_value
        FROM block_twaps
        WHERE block_number = $1 AND is_confirmed = $2
        ORDER BY window_type ASC
        "#,
    )
    .bind(block_number)
    .bind(is_confirmed)
    .fetch_all(pool)
    .await
}

/// Queues a `confirmed_insert` notification; Postgres delivers it on commit.
pub async fn notify_confirmed_insert(conn: &mut PgConnection, payload: &str) -> Result<(), Error> {
    sqlx::query("SELECT pg_notify('confirmed_insert', $1)")
        .bind(payload)
        .execute(conn)
        .await?;

    Ok(())
}
