//! # Si446x Radio Driver
//!
//! Layers, leaves first:
//!
//! - [`fsm`]: the static transition table and its interpreter
//! - [`hal`]: the transport trait, the simulated chip and the Raspberry Pi
//!   implementation
//! - [`chip`]: typed Si446x API commands over a transport
//! - [`timer`]: the single driver timer and its schedulers
//! - [`actions`]: one handler per table action
//! - [`dispatch`]: pending flags to events, bounded rounds
//! - [`driver`]: the facade owning all of the above
//! - [`service`]: the facade on a tokio task

pub mod actions;
pub mod chip;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod fsm;
pub mod hal;
pub mod irq;
pub mod service;
pub mod timer;
pub mod trace;

pub use actions::{DriverContext, Notification, SendCondition};
pub use chip::{ChipState, Radio};
pub use config::{ConfigList, GpioPins, RadioConfig, TimingConfig};
pub use dispatch::{Dispatcher, InterruptReport};
pub use driver::{ControlRequest, Driver, Outcome, StatusReport};
pub use fsm::{lookup, Action, Event, State, StateMachine, Transition, TRANSITIONS};
pub use hal::{HalError, MockChip, MockTransport, Transport};
pub use irq::{FastRegisters, ModemPend, PendingFlags, PhPend};
pub use service::{DriverHandle, InterruptLine, Service, ServiceBuilder};
pub use timer::{ManualScheduler, Scheduler, TimerEvent, TimerHandle, TokioScheduler};
pub use trace::{Trace, TraceKind, TraceRecord};
