//! # Driver Error Handling
//!
//! This module defines the error types of the si446x-rs crate.
//!
//! Only [`DriverError`] is ever returned as an `Err`. The anomalies a running
//! radio produces on every busy day (missed CTS, bad lengths, CRC failures,
//! spurious or stuck interrupts, bad control requests) are described by
//! [`Anomaly`]; they are logged and traced, never propagated.

use crate::radio::fsm::{Event, State};
use serde::Serialize;
use thiserror::Error;

/// Errors that escape the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An event reached the state machine for a pair absent from the
    /// transition table. The driver and the chip have desynchronized.
    #[error("Fatal transition: no entry for event {event:?} in state {state:?}")]
    FatalTransition { state: State, event: Event },

    /// Configuration could not be loaded or validated.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The driver service is gone (its input queue closed).
    #[error("Driver channel closed")]
    ChannelClosed,
}

impl DriverError {
    /// True for the one error class that must stop the driver.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::FatalTransition { .. })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid hex in {list} config list: {reason}")]
    InvalidHex { list: &'static str, reason: String },

    #[error("Malformed {list} config list at offset {offset}: {reason}")]
    MalformedList {
        list: &'static str,
        offset: usize,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Conditions the driver handles locally.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum Anomaly {
    /// CTS was not observed within the poll budget; the flow continued.
    #[error("hardware ack timeout: {0}")]
    HardwareAckTimeout(String),

    /// Bytes drained from the RX FIFO do not match the chip's packet length.
    #[error("rx length mismatch: got {received} bytes, chip reported {expected}")]
    ProtocolLengthMismatch { received: usize, expected: usize },

    /// A received packet failed CRC.
    #[error("crc mismatch")]
    CrcMismatch,

    /// A pending flag arrived while the current state does not expect it.
    #[error("phantom {flag} in state {state:?}")]
    PhantomInterrupt { flag: &'static str, state: State },

    /// Flags were still pending after the bounded number of service rounds.
    #[error("interrupts stuck after {rounds} rounds: {pending}")]
    StuckInterrupt { rounds: usize, pending: String },

    /// A control request was unknown or not valid in the current state.
    #[error("invalid control request {request} in state {state:?}")]
    InvalidControlRequest { request: String, state: State },
}
