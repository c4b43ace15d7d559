//! # Hardware Abstraction Layer for the Si446x
//!
//! This module defines the transport trait the driver core consumes and the
//! platform implementations behind it.
//!
//! The Si446x is driven through four SPI transactions plus three GPIOs:
//!
//! - **command**: write a command into the chip's 16-byte command buffer
//! - **response**: read back the response to the previous command
//! - **FIFO read/write**: direct access to the 64-byte RX/TX FIFOs
//! - **fast response registers**: four status bytes readable without a
//!   command/response round trip
//! - **CTS** (input), **NIRQ** (input, falling edge), **SDN** (output)
//!
//! Implementations poll CTS with a bounded timeout before each command and
//! response. A missed CTS is reported as [`HalError::CtsTimeout`] only when
//! the exchange could not be attempted at all; otherwise it is logged and the
//! exchange proceeds.

use thiserror::Error;

/// Errors that can occur during HAL operations
#[derive(Debug, Error)]
pub enum HalError {
    #[error("SPI communication error: {0}")]
    Spi(String),

    #[error("GPIO operation error: {0}")]
    Gpio(String),

    #[error("Timeout waiting for CTS")]
    CtsTimeout,

    #[error("Transfer too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Hardware transport for one Si446x chip
pub trait Transport {
    /// Send a command message to the chip
    fn command(&mut self, bytes: &[u8]) -> Result<(), HalError>;

    /// Read `len` bytes of the response to the previous command
    fn response(&mut self, len: usize) -> Result<Vec<u8>, HalError>;

    /// Read `len` bytes from the receive FIFO
    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError>;

    /// Write bytes into the transmit FIFO
    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), HalError>;

    /// Read `len` fast response registers starting at register `offset` (0..=3)
    fn read_fast_registers(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HalError>;

    /// Drive the chip's power: `true` releases SDN, `false` asserts it
    fn power_enable(&mut self, on: bool) -> Result<(), HalError>;

    /// Arm or disarm the NIRQ edge interrupt
    fn interrupt_enable(&mut self, on: bool) -> Result<(), HalError>;

    /// Current state of the CTS line
    fn cts(&mut self) -> Result<bool, HalError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn command(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        (**self).command(bytes)
    }

    fn response(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        (**self).response(len)
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        (**self).read_fifo(len)
    }

    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        (**self).write_fifo(bytes)
    }

    fn read_fast_registers(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HalError> {
        (**self).read_fast_registers(offset, len)
    }

    fn power_enable(&mut self, on: bool) -> Result<(), HalError> {
        (**self).power_enable(on)
    }

    fn interrupt_enable(&mut self, on: bool) -> Result<(), HalError> {
        (**self).interrupt_enable(on)
    }

    fn cts(&mut self) -> Result<bool, HalError> {
        (**self).cts()
    }
}

// Simulated chip for tests and hardware-less runs
pub mod mock;

// Platform implementations
#[cfg(feature = "raspberry-pi")]
pub mod raspberry_pi;

pub use mock::{MockChip, MockTransport};

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::{InterruptCallback, RaspberryPiTransport};
