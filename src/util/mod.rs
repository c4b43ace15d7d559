//! # Utility Modules
//!
//! Hex encoding/decoding and rate-limited logging used throughout the
//! si446x-rs crate.

pub mod hex;
pub mod logging;

// Re-export commonly used types and functions
pub use hex::{decode_hex, encode_hex, format_hex_compact, HexError};
pub use logging::{log_fifo_hex, LogThrottle, ThrottleManager};
