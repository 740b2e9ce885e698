/// Base-fee view of a Fossil `blockheaders` row. The fee is stored as a hex
/// string.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct BlockHeaderSubset {
    pub number: i64,
    pub base_fee_per_gas: Option<String>,
    pub timestamp: Option<i64>,
}

/// Row of the aggregate database's `blocks` table.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct BlockRow {
    pub block_number: i64,
    pub timestamp: i64,
    pub basefee: Option<f64>,
    pub is_confirmed: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct TwapStateRow {
    pub window_type: String,
    pub is_confirmed: bool,
    pub weighted_sum: f64,
    pub total_seconds: i64,
    pub twap_value: f64,
    pub last_block_number: i64,
    pub last_block_timestamp: i64,
}

/// TWAP of one window as of one block.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct BlockTwapRow {
    pub block_number: i64,
    pub window_type: String,
    pub is_confirmed: bool,
    pub twap_value: f64,
}
