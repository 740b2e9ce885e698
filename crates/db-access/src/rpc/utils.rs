use crate::utils::{hex_string_to_f64, parse_hex_to_u64};
use eyre::{eyre, Result};
use serde::Serialize;
use serde_json::Value;

/// The fields of an `eth_getBlockByNumber` result the TWAP pipelines use.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcBlock {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<f64>,
}

fn required_quantity(block_result: &Value, field: &str) -> Result<u64> {
    let hex = block_result[field]
        .as_str()
        .ok_or_else(|| eyre!("Block is missing {}", field))?;
    parse_hex_to_u64(hex)
}

pub fn json_to_block(block_result: &Value) -> Result<RpcBlock> {
    let base_fee_per_gas = match block_result["baseFeePerGas"].as_str() {
        Some(hex) => Some(hex_string_to_f64(hex)?),
        None => None,
    };

    Ok(RpcBlock {
        number: required_quantity(block_result, "number")?,
        timestamp: required_quantity(block_result, "timestamp")?,
        base_fee_per_gas,
    })
}
