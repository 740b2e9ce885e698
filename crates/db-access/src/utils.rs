use eyre::{eyre, Result};

/// Parses a `0x`-prefixed (or bare) hex quantity.
pub fn parse_hex_to_u64(hex_str: &str) -> Result<u64> {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| eyre!("Invalid hex quantity {:?}: {}", hex_str, e))
}

/// Parses a hex wei amount into an `f64`.
pub fn hex_string_to_f64(hex_str: &str) -> Result<f64> {
    let stripped = hex_str.trim_start_matches("0x");
    u128::from_str_radix(stripped, 16)
        .map(|value| value as f64)
        .map_err(|e| eyre!("Error converting hex string {:?} to f64: {}", hex_str, e))
}
