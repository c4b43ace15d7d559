//! Si446x Driver Constants
//!
//! Timing, FIFO geometry and wiring defaults for the Si446x transceiver,
//! based on the Si4463 revB1B API reference.

use std::time::Duration;

/// Time allowed for the chip to come out of shutdown after SDN is released
pub const POWER_ON_WAIT_TIME: Duration = Duration::from_millis(10);

/// Time allowed for POWER_UP to complete (boot + crystal start)
pub const POWER_UP_WAIT_TIME: Duration = Duration::from_millis(20);

/// Upper bound on a single transmit before it is declared timed out
pub const TX_WAIT_TIME: Duration = Duration::from_millis(100);

/// Upper bound on a single reception after sync detect
pub const RX_WAIT_TIME: Duration = Duration::from_millis(100);

/// Transmit FIFO depth in bytes
pub const TX_FIFO_MAX: usize = 64;

/// Receive FIFO depth in bytes
pub const RX_FIFO_MAX: usize = 64;

/// Size of the chip's shared command/response buffer
pub const MAX_RADIO_RSP: usize = 16;

/// Largest number of property bytes a single SET_PROPERTY may carry
pub const MAX_GROUP_WRITE: usize = 12;

/// Number of pending-flag service rounds before interrupts are declared stuck
pub const MAX_INTERRUPT_ROUNDS: usize = 5;

/// Number of CTS polls (1 ms apart) before a command proceeds without CTS
pub const CTS_POLL_LIMIT: u32 = 100;

/// Bounded wait used when forcing the chip to SLEEP
pub const SLEEP_WAIT_MS: u32 = 100;

/// Default crystal frequency for POWER_UP
pub const DEFAULT_XO_FREQ: u32 = 30_000_000;

/// Default latched-RSSI threshold below which the channel is considered clear
pub const DEFAULT_CCA_THRESHOLD: u8 = 0x40;

/// Default trace ring depth
pub const DEFAULT_TRACE_DEPTH: usize = 1000;

/// Default GPIO (board numbering) wired to the chip's CTS output
pub const GPIO_CTS: u8 = 16;

/// Default GPIO (board numbering) wired to the chip's NIRQ output
pub const GPIO_NIRQ: u8 = 22;

/// Default GPIO (board numbering) wired to the chip's SDN input
pub const GPIO_SDN: u8 = 18;

/// Transmit power applied when a caller passes zero
pub const DEFAULT_TX_POWER: u8 = 0x7f;
