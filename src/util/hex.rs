//! # Hex Encoding/Decoding Utilities
//!
//! Hex helpers used for config-string lists in configuration files and for
//! logging FIFO payloads and command bytes.
//!
//! ## Usage
//!
//! ```rust
//! use si446x_rs::util::hex::{encode_hex, decode_hex, format_hex_compact};
//!
//! let cmd = [0x02, 0x01, 0x03];
//! assert_eq!(encode_hex(&cmd), "020103");
//! assert_eq!(decode_hex("02 01 03").unwrap(), cmd);
//! assert_eq!(format_hex_compact(&cmd), "02 01 03");
//! ```

use thiserror::Error;

/// Errors that can occur during hex operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HexError {
    #[error("Odd number of hex characters: {0}")]
    OddLength(usize),

    #[error("Hex decoding error: {0}")]
    DecodeError(String),
}

/// Encode bytes to lowercase hex string
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode hex string to bytes
///
/// Accepts both uppercase and lowercase hex characters. Whitespace is
/// stripped, so config lists may be laid out one string per line. An empty
/// input decodes to an empty vector.
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, HexError> {
    let cleaned: String = hex_str.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.len() % 2 != 0 {
        return Err(HexError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| HexError::DecodeError(e.to_string()))
}

/// Format hex data for compact display (useful for logs)
///
/// Formats data as "66 01 02" with spaces between bytes.
pub fn format_hex_compact(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
