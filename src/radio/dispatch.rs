//! # Interrupt Dispatcher
//!
//! Turns the chip's pending flags into state-machine events.
//!
//! One service pass runs up to [`MAX_INTERRUPT_ROUNDS`] rounds. Each round:
//!
//! 1. read the pending flags without clearing anything
//! 2. walk [`FLAG_RULES`] in order; for each asserted flag either dispatch
//!    its event (the state guard holds), log a phantom (it does not), or
//!    just observe it (telemetry-only flags)
//! 3. clear exactly the flags handled this round
//!
//! The guard is checked against the state *at that moment*, so a batch
//! holding both SYNC_DETECT and PACKET_RX walks RxIdle -> RxActive -> RxIdle
//! in one round. Flags still pending after the last round are reported
//! once as stuck, followed by a defensive chip status read.
//!
//! TX_FIFO_ALMOST_EMPTY is guarded to TxActive. A threshold that lands in
//! the same batch as PACKET_SENT is therefore a phantom, not a fatal
//! transition from RxIdle.

use crate::constants::MAX_INTERRUPT_ROUNDS;
use crate::error::{Anomaly, DriverError};
use crate::radio::fsm::{Event, State};
use crate::radio::irq::{ModemPend, PendingFlags, PhPend};
use crate::radio::trace::TraceKind;
use crate::util::logging::LogThrottle;

/// What the dispatcher needs from the driver
pub trait InterruptSink {
    fn state(&self) -> State;

    /// Current pending flags, nothing cleared
    fn read_pending(&mut self) -> PendingFlags;

    /// Clear exactly `flags`
    fn clear_pending(&mut self, flags: PendingFlags);

    /// Feed one event through the state machine
    fn dispatch(&mut self, event: Event) -> Result<(), DriverError>;

    fn record(&mut self, kind: TraceKind);

    /// Status read issued after interrupts are declared stuck
    fn defensive_read(&mut self);
}

/// How one pending flag is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagRule {
    pub name: &'static str,
    pub flags: PendingFlags,
    /// `None` for flags that are cleared but never produce an event
    pub event: Option<Event>,
    /// `None` dispatches in any state
    pub valid_in: Option<State>,
}

const fn modem(
    name: &'static str,
    flag: ModemPend,
    event: Option<Event>,
    valid_in: Option<State>,
) -> FlagRule {
    FlagRule {
        name,
        flags: PendingFlags {
            modem_pend: flag,
            ph_pend: PhPend::empty(),
        },
        event,
        valid_in,
    }
}

const fn ph(
    name: &'static str,
    flag: PhPend,
    event: Option<Event>,
    valid_in: Option<State>,
) -> FlagRule {
    FlagRule {
        name,
        flags: PendingFlags {
            modem_pend: ModemPend::empty(),
            ph_pend: flag,
        },
        event,
        valid_in,
    }
}

/// Flags in service order
pub static FLAG_RULES: [FlagRule; 10] = [
    modem("INVALID_SYNC", ModemPend::INVALID_SYNC, Some(Event::InvalidSync), Some(State::RxIdle)),
    modem("PREAMBLE_DETECT", ModemPend::PREAMBLE_DETECT, Some(Event::PreambleDetect), Some(State::RxIdle)),
    modem("SYNC_DETECT", ModemPend::SYNC_DETECT, Some(Event::SyncDetect), Some(State::RxIdle)),
    ph("CRC_ERROR", PhPend::CRC_ERROR, Some(Event::CrcError), Some(State::RxActive)),
    ph("PACKET_RX", PhPend::PACKET_RX, Some(Event::PacketRx), Some(State::RxActive)),
    ph("PACKET_SENT", PhPend::PACKET_SENT, Some(Event::PacketSent), None),
    ph("RX_FIFO_ALMOST_FULL", PhPend::RX_FIFO_ALMOST_FULL, Some(Event::RxThresh), Some(State::RxActive)),
    ph("TX_FIFO_ALMOST_EMPTY", PhPend::TX_FIFO_ALMOST_EMPTY, Some(Event::TxThresh), Some(State::TxActive)),
    modem("RSSI", ModemPend::RSSI, None, None),
    modem("INVALID_PREAMBLE", ModemPend::INVALID_PREAMBLE, None, None),
];

/// Result of checking one asserted flag against the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dispatch(Event),
    Phantom,
    Observe,
}

impl FlagRule {
    fn asserted_in(&self, pending: PendingFlags) -> bool {
        pending.modem_pend.intersects(self.flags.modem_pend)
            || pending.ph_pend.intersects(self.flags.ph_pend)
    }

    pub fn disposition(&self, state: State) -> Disposition {
        match (self.event, self.valid_in) {
            (None, _) => Disposition::Observe,
            (Some(event), None) => Disposition::Dispatch(event),
            (Some(event), Some(valid)) if valid == state => Disposition::Dispatch(event),
            (Some(_), Some(_)) => Disposition::Phantom,
        }
    }
}

/// Summary of one service pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptReport {
    /// Rounds that found something pending
    pub rounds: usize,
    pub dispatched: usize,
    pub phantoms: usize,
    pub stuck: bool,
}

/// Bounded interrupt service loop
#[derive(Debug)]
pub struct Dispatcher {
    max_rounds: usize,
    phantom_log: LogThrottle,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            max_rounds: MAX_INTERRUPT_ROUNDS,
            phantom_log: LogThrottle::new(1000, 10),
        }
    }

    /// Log line for a phantom, or `None` while throttled. The first line
    /// after a throttled stretch carries the number of phantoms dropped.
    fn phantom_line(&mut self, flag: &str, state: State) -> Option<String> {
        if !self.phantom_log.allow() {
            return None;
        }
        let line = match self.phantom_log.take_suppressed() {
            0 => format!("phantom {} in {:?}", flag, state),
            n => format!("phantom {} in {:?} ({} suppressed)", flag, state, n),
        };
        Some(line)
    }

    /// Service pending interrupts. Only a fatal transition is an error.
    pub fn service<K: InterruptSink>(&mut self, sink: &mut K) -> Result<InterruptReport, DriverError> {
        let mut report = InterruptReport::default();

        for _ in 0..self.max_rounds {
            let pending = sink.read_pending();
            if pending.is_empty() {
                return Ok(report);
            }
            report.rounds += 1;
            sink.record(TraceKind::Interrupt { pending });

            let handled = self.process(sink, pending, &mut report)?;
            sink.clear_pending(handled);
        }

        let pending = sink.read_pending();
        if !pending.is_empty() {
            report.stuck = true;
            log::error!(
                "interrupts stuck after {} rounds: {}",
                self.max_rounds,
                pending
            );
            sink.record(TraceKind::Anomaly {
                anomaly: Anomaly::StuckInterrupt {
                    rounds: self.max_rounds,
                    pending: pending.to_string(),
                },
            });
            sink.defensive_read();
        }
        Ok(report)
    }

    fn process<K: InterruptSink>(
        &mut self,
        sink: &mut K,
        pending: PendingFlags,
        report: &mut InterruptReport,
    ) -> Result<PendingFlags, DriverError> {
        let mut handled = PendingFlags::default();

        for rule in FLAG_RULES.iter().filter(|rule| rule.asserted_in(pending)) {
            let state = sink.state();
            match rule.disposition(state) {
                Disposition::Dispatch(event) => {
                    sink.dispatch(event)?;
                    report.dispatched += 1;
                }
                Disposition::Phantom => {
                    report.phantoms += 1;
                    if let Some(line) = self.phantom_line(rule.name, state) {
                        log::warn!("{}", line);
                    }
                    sink.record(TraceKind::Anomaly {
                        anomaly: Anomaly::PhantomInterrupt {
                            flag: rule.name,
                            state,
                        },
                    });
                }
                Disposition::Observe => {}
            }
            handled.modem_pend |= rule.flags.modem_pend;
            handled.ph_pend |= rule.flags.ph_pend;
        }
        Ok(handled)
    }
}
