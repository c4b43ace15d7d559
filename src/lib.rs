//! # si446x-rs - A Rust Crate for the Si446x Packet Radio
//!
//! The si446x-rs crate drives a Silicon Labs Si446x sub-GHz transceiver over
//! SPI plus a NIRQ interrupt line, exposing send, receive and control
//! operations to a higher layer.
//!
//! ## Features
//!
//! - Table-driven state machine sequencing power-up, configuration, receive
//!   and transmit
//! - Interrupt dispatcher with phantom-flag filtering and bounded service rounds
//! - FIFO streaming for packets larger than the 64-byte hardware FIFO
//! - Single outstanding driver timer with idempotent cancel
//! - Bounded trace of every dispatch with a fast-register snapshot
//! - Tokio service with an async handle, plus a simulated chip for running
//!   without hardware
//! - Raspberry Pi transport (`raspberry-pi` feature)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! si446x-rs = "0.1.0"
//! ```
//!
//! ```rust
//! use si446x_rs::radio::{Driver, Event, ManualScheduler, MockTransport, RadioConfig, State};
//!
//! let sched = ManualScheduler::new();
//! let mut driver = Driver::new(MockTransport::new(), sched.clone(), &RadioConfig::default())?;
//! driver.control("TURNON")?;
//! while let Some(event) = sched.next_event() {
//!     driver.on_scheduler_event(event)?;
//! }
//! assert_eq!(driver.state(), State::RxIdle);
//! # Ok::<(), si446x_rs::error::DriverError>(())
//! ```

pub mod constants;
pub mod error;
pub mod logging;
pub mod radio;
pub mod util;

pub use crate::error::{Anomaly, ConfigError, DriverError};
pub use crate::logging::{init_logger, log_info};

pub use radio::{
    Driver, DriverHandle, Event, InterruptLine, Notification, Outcome, RadioConfig, ServiceBuilder,
    State, StatusReport,
};
