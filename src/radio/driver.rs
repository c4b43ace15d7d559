//! # Driver Facade
//!
//! [`Driver`] owns one state machine, one [`DriverContext`], one [`Radio`]
//! and one scheduler. It is not thread safe and does not need to be: every
//! stimulus (control request, send, interrupt, timer firing, deferred event)
//! enters through a `&mut self` method, so only one dispatch runs at a time.
//! [`crate::radio::service`] puts it behind a queue for async callers.
//!
//! ## Dispatch
//!
//! Every event goes through [`Driver::step`]:
//!
//! 1. snapshot the fast response registers
//! 2. append a trace record of (event, prior state, snapshot)
//! 3. run the transition's actions, then commit the new state
//! 4. move anomalies and notifications out of the dispatch
//!
//! An undefined (state, event) pair is traced, logged and returned as
//! [`DriverError::FatalTransition`]; the state is left unchanged.
//!
//! ## Example
//!
//! ```rust
//! use si446x_rs::radio::{Driver, ManualScheduler, MockTransport, RadioConfig};
//!
//! let mut driver = Driver::new(MockTransport::new(), ManualScheduler::new(), &RadioConfig::default())?;
//! assert_eq!(driver.control("TURNON")?.to_string(), "ok");
//! assert_eq!(driver.status().status, "ON");
//! # Ok::<(), si446x_rs::error::DriverError>(())
//! ```

use crate::error::{Anomaly, ConfigError, DriverError};
use crate::radio::actions::{ActionSettings, Actions, DriverContext, Effects, Notification};
use crate::radio::chip::Radio;
use crate::radio::config::RadioConfig;
use crate::radio::dispatch::{Dispatcher, InterruptReport, InterruptSink};
use crate::radio::fsm::{lookup, Event, State, StateMachine};
use crate::radio::hal::Transport;
use crate::radio::irq::{ClearMask, PendingFlags};
use crate::radio::timer::{Scheduler, TimerEvent, TimerId};
use crate::radio::trace::{Trace, TraceKind, TraceRecord};
use bytes::Bytes;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Result string handed back to control and send callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    /// Not valid in the current state
    Already,
    /// A transmit is already in flight
    Busy,
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Ok => "ok",
            Outcome::Already => "already",
            Outcome::Busy => "busy",
            Outcome::Error => "error",
        };
        f.write_str(s)
    }
}

/// Named control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    TurnOn,
    TurnOff,
    Standby,
}

impl ControlRequest {
    /// Case-insensitive lookup by name (`TURNON`, `TURNOFF`, `STANDBY`)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TURNON" => Some(ControlRequest::TurnOn),
            "TURNOFF" => Some(ControlRequest::TurnOff),
            "STANDBY" => Some(ControlRequest::Standby),
            _ => None,
        }
    }

    pub fn event(self) -> Event {
        match self {
            ControlRequest::TurnOn => Event::TurnOn,
            ControlRequest::TurnOff => Event::TurnOff,
            ControlRequest::Standby => Event::Standby,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RxCounters {
    pub packets: u32,
    pub timeouts: u32,
    pub len_errors: u32,
    pub sync_errors: u32,
    pub crc_errors: u32,
    pub rssi: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxCounters {
    pub packets: u32,
    pub timeouts: u32,
    pub errors: u32,
    pub power: u8,
}

/// Aggregate driver status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// OFF, STANDBY or ON
    pub status: &'static str,
    pub state: State,
    pub unshuts: u32,
    pub rx: RxCounters,
    pub tx: TxCounters,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status {} ({}), unshuts {}", self.status, self.state, self.unshuts)?;
        let rx = &self.rx;
        writeln!(
            f,
            "  rx: packets {} timeouts {} len_errors {} sync_errors {} crc_errors {} rssi 0x{:02x}",
            rx.packets, rx.timeouts, rx.len_errors, rx.sync_errors, rx.crc_errors, rx.rssi
        )?;
        let tx = &self.tx;
        write!(
            f,
            "  tx: packets {} timeouts {} errors {} power 0x{:02x}",
            tx.packets, tx.timeouts, tx.errors, tx.power
        )
    }
}

/// The Si446x driver
pub struct Driver<T: Transport, S: Scheduler> {
    fsm: StateMachine,
    ctx: DriverContext,
    radio: Radio<T>,
    scheduler: S,
    settings: ActionSettings,
    trace: Trace,
    dispatcher: Dispatcher,
    cca_threshold: u8,
    tx_power: u8,
    notifications: VecDeque<Notification>,
}

impl<T: Transport, S: Scheduler> Driver<T, S> {
    /// Build a driver in `ShutDown`. Fails only if the config-string lists
    /// do not parse.
    pub fn new(transport: T, scheduler: S, config: &RadioConfig) -> Result<Self, ConfigError> {
        let config_lists = config.config_lists()?.to_vec();
        let mut ctx = DriverContext::default();
        ctx.tx.power = config.tx_power;

        Ok(Self {
            fsm: StateMachine::new(),
            ctx,
            radio: Radio::new(transport).with_xo_freq(config.xo_freq),
            scheduler,
            settings: ActionSettings {
                timing: config.timing.clone(),
                channel: config.channel,
                config_lists,
            },
            trace: Trace::new(config.trace_depth),
            dispatcher: Dispatcher::new(),
            cca_threshold: config.cca_threshold,
            tx_power: config.tx_power,
            notifications: VecDeque::new(),
        })
    }

    pub fn state(&self) -> State {
        self.fsm.state()
    }

    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    pub fn radio(&self) -> &Radio<T> {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut Radio<T> {
        &mut self.radio
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Dispatch one event through the state machine
    pub fn step(&mut self, event: Event) -> Result<State, DriverError> {
        let prior = self.fsm.state();
        let frr = self.radio.fast_all();
        self.trace.add(TraceKind::Transition {
            event,
            state: prior,
            frr,
        });

        let mut effects = Effects::default();
        let result = {
            let Self {
                fsm,
                ctx,
                radio,
                scheduler,
                settings,
                ..
            } = self;
            let mut actions = Actions {
                ctx,
                radio,
                scheduler,
                settings,
                effects: &mut effects,
            };
            fsm.receive(event, |action, event| actions.run(action, event))
        };

        self.drain_anomalies(effects.anomalies.drain(..));
        self.notifications.extend(effects.notifications);

        match result {
            Ok(transition) => {
                if effects.status_changed {
                    self.notifications
                        .push_back(Notification::NewStatus(transition.to.status_label()));
                }
                Ok(transition.to)
            }
            Err(e) => {
                log::error!("{}", e);
                self.trace.add(TraceKind::Fatal { event, state: prior });
                Err(e)
            }
        }
    }

    /// Trace anomalies raised by the chip layer and by the last dispatch
    fn drain_anomalies(&mut self, extra: impl IntoIterator<Item = Anomaly>) {
        let from_radio = self.radio.take_anomalies();
        for anomaly in from_radio.into_iter().chain(extra) {
            log::debug!("anomaly: {}", anomaly);
            self.trace.add(TraceKind::Anomaly { anomaly });
        }
    }

    fn reject(&mut self, request: &str, state: State) {
        log::warn!("control request {} rejected in {}", request, state);
        self.trace.add(TraceKind::Anomaly {
            anomaly: Anomaly::InvalidControlRequest {
                request: request.to_string(),
                state,
            },
        });
    }

    /// Handle a named control request: `TURNON`, `TURNOFF` or `STANDBY`.
    ///
    /// Unknown names give [`Outcome::Error`]; a request with no transition
    /// from the current state gives [`Outcome::Already`] and changes nothing.
    pub fn control(&mut self, request: &str) -> Result<Outcome, DriverError> {
        let state = self.fsm.state();
        let outcome = match ControlRequest::parse(request) {
            None => {
                self.reject(request, state);
                Outcome::Error
            }
            Some(req) if lookup(state, req.event()).is_none() => {
                self.reject(request, state);
                Outcome::Already
            }
            Some(req) => {
                self.step(req.event())?;
                if matches!(req, ControlRequest::TurnOn | ControlRequest::TurnOff) {
                    self.clear_buffers();
                }
                Outcome::Ok
            }
        };

        log::info!("control {} in {} -> {}", request, state, outcome);
        self.trace.add(TraceKind::Control {
            request: request.to_string(),
            outcome: outcome.to_string(),
        });
        Ok(outcome)
    }

    fn clear_buffers(&mut self) {
        self.ctx.rx.buffer.clear();
        self.ctx.rx.offset = 0;
        self.ctx.tx.buffer = None;
        self.ctx.tx.offset = 0;
    }

    /// Start a transmit. `power` 0 uses the configured default.
    ///
    /// Returns [`Outcome::Busy`] while a transmit is in flight and
    /// [`Outcome::Error`] outside `RxIdle` or for an unusable buffer.
    pub fn send(&mut self, buffer: Bytes, power: u8) -> Result<Outcome, DriverError> {
        let state = self.fsm.state();
        let outcome = if self.ctx.tx.buffer.is_some() {
            Outcome::Busy
        } else if state != State::RxIdle {
            Outcome::Error
        } else if buffer.is_empty() || buffer.len() > u16::MAX as usize {
            log::warn!("send rejected: {} byte buffer", buffer.len());
            Outcome::Error
        } else {
            self.ctx.tx.power = if power == 0 { self.tx_power } else { power };
            self.ctx.tx.offset = 0;
            self.ctx.tx.buffer = Some(buffer);
            self.step(Event::Transmit)?;
            Outcome::Ok
        };

        if outcome != Outcome::Ok {
            log::debug!("send in {} -> {}", state, outcome);
        }
        Ok(outcome)
    }

    pub fn status(&self) -> StatusReport {
        let state = self.fsm.state();
        let rx = &self.ctx.rx;
        let tx = &self.ctx.tx;
        StatusReport {
            status: state.status_label(),
            state,
            unshuts: self.ctx.ioc.unshuts,
            rx: RxCounters {
                packets: rx.packets,
                timeouts: rx.timeouts,
                len_errors: rx.len_errors,
                sync_errors: rx.sync_errors,
                crc_errors: rx.crc_errors,
                rssi: rx.rssi,
            },
            tx: TxCounters {
                packets: tx.packets,
                timeouts: tx.timeouts,
                errors: tx.errors,
                power: tx.power,
            },
        }
    }

    /// Zero every counter, returning the report as it was before
    pub fn clear_status(&mut self) -> StatusReport {
        let report = self.status();
        self.ctx.clear_counters();
        report
    }

    /// Latched RSSI of the last reception
    pub fn cca(&self) -> u8 {
        self.ctx.rx.rssi
    }

    pub fn channel_clear(&self) -> bool {
        self.ctx.rx.rssi < self.cca_threshold
    }

    pub fn dump_trace(&self, n: usize) -> Vec<TraceRecord> {
        self.trace.recent(n)
    }

    /// A timer ran out. Firings for anything but the active timer are stale.
    pub fn on_timer(&mut self, id: TimerId) -> Result<(), DriverError> {
        match &self.ctx.active_timer {
            Some(timer) if timer.id() == id => {}
            _ => {
                log::debug!("stale timer {} discarded", id);
                return Ok(());
            }
        }
        self.ctx.active_timer = None;
        self.step(Event::WaitDone).map(|_| ())
    }

    /// A deferred event came round. Anything the driver is no longer
    /// waiting for (a forced power down cleared it) is stale.
    pub fn on_deferred(&mut self, event: Event) -> Result<(), DriverError> {
        if self.ctx.deferred != Some(event) {
            log::debug!("stale deferred {:?} discarded", event);
            return Ok(());
        }
        self.ctx.deferred = None;
        self.step(event).map(|_| ())
    }

    pub fn on_scheduler_event(&mut self, event: TimerEvent) -> Result<(), DriverError> {
        match event {
            TimerEvent::Fired(id) => self.on_timer(id),
            TimerEvent::Deferred(event) => self.on_deferred(event),
        }
    }

    /// Service the chip's pending interrupts
    pub fn on_interrupt(&mut self) -> Result<InterruptReport, DriverError> {
        let mut dispatcher = std::mem::take(&mut self.dispatcher);
        let result = dispatcher.service(self);
        self.dispatcher = dispatcher;
        self.drain_anomalies(None);
        result
    }

    /// Notifications produced since the last call, oldest first
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Force the chip off from any state, through the table when possible.
    ///
    /// The power-up wait states have no `TurnOff` row. There the chip is
    /// shut down directly and the machine is reset to `ShutDown`, so the
    /// driver never reports a warm-up while SDN is asserted.
    pub fn power_down(&mut self) -> Result<(), DriverError> {
        let state = self.fsm.state();
        if state == State::ShutDown {
            return Ok(());
        }
        if self.fsm.accepts(Event::TurnOff) {
            return self.control("TURNOFF").map(|_| ());
        }

        log::warn!("forced power down in {}", state);
        if let Some(timer) = self.ctx.active_timer.take() {
            timer.cancel();
        }
        self.radio.disable_interrupts();
        self.radio.shutdown();
        self.drain_anomalies(None);
        self.clear_buffers();
        self.ctx.deferred = None;
        self.fsm.reset();
        self.trace.add(TraceKind::Control {
            request: "POWER_DOWN".to_string(),
            outcome: format!("forced from {}", state),
        });
        if state.status_label() != State::ShutDown.status_label() {
            self.notifications
                .push_back(Notification::NewStatus(State::ShutDown.status_label()));
        }
        Ok(())
    }
}

impl<T: Transport, S: Scheduler> InterruptSink for Driver<T, S> {
    fn state(&self) -> State {
        self.fsm.state()
    }

    fn read_pending(&mut self) -> PendingFlags {
        self.radio.get_clear_interrupts(ClearMask::default()).pending()
    }

    fn clear_pending(&mut self, flags: PendingFlags) {
        self.radio.get_clear_interrupts(ClearMask::of(flags));
    }

    fn dispatch(&mut self, event: Event) -> Result<(), DriverError> {
        self.step(event).map(|_| ())
    }

    fn record(&mut self, kind: TraceKind) {
        self.trace.add(kind);
    }

    fn defensive_read(&mut self) {
        let status = self.radio.get_chip_status();
        log::warn!("chip status after stuck interrupts: {:?}", status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::actions::SendCondition;
    use crate::radio::hal::MockTransport;
    use crate::radio::irq::{ModemPend, PhPend};
    use crate::radio::timer::ManualScheduler;

    type TestDriver = Driver<MockTransport, ManualScheduler>;

    fn driver() -> (TestDriver, MockTransport, ManualScheduler) {
        let chip = MockTransport::new();
        let sched = ManualScheduler::new();
        let driver = Driver::new(chip.clone(), sched.clone(), &RadioConfig::default()).unwrap();
        (driver, chip, sched)
    }

    /// Run timers and deferred events until nothing is left
    fn settle(driver: &mut TestDriver, sched: &ManualScheduler) {
        while let Some(event) = sched.next_event() {
            driver.on_scheduler_event(event).unwrap();
        }
    }

    fn powered() -> (TestDriver, MockTransport, ManualScheduler) {
        let (mut driver, chip, sched) = driver();
        driver.control("TURNON").unwrap();
        settle(&mut driver, &sched);
        driver.take_notifications();
        (driver, chip, sched)
    }

    #[test]
    fn test_turn_on_reaches_rx_idle() {
        let (driver, chip, _) = powered();
        assert_eq!(driver.state(), State::RxIdle);
        assert_eq!(driver.status().unshuts, 1);
        assert!(chip.chip().irq_enabled);
    }

    #[test]
    fn test_turn_on_twice_is_already() {
        let (mut driver, _, _) = powered();
        let before = driver.trace().len();
        assert_eq!(driver.control("TURNON").unwrap(), Outcome::Already);
        assert_eq!(driver.state(), State::RxIdle);
        // rejection and control record only, no transition
        assert_eq!(
            driver
                .trace()
                .iter()
                .skip(before)
                .filter(|r| matches!(r.kind, TraceKind::Transition { .. }))
                .count(),
            0
        );
    }

    #[test]
    fn test_unknown_control_is_error() {
        let (mut driver, _, _) = driver();
        assert_eq!(driver.control("REBOOT").unwrap(), Outcome::Error);
        assert_eq!(driver.state(), State::ShutDown);
    }

    #[test]
    fn test_stale_timer_discarded() {
        let (mut driver, _, sched) = driver();
        driver.control("TURNON").unwrap();
        let armed = sched.armed();
        assert_eq!(armed.len(), 1);
        driver.on_timer(armed[0].0 + 100).unwrap();
        assert_eq!(driver.state(), State::PowerOnWait);
    }

    #[test]
    fn test_send_busy_and_error() {
        let (mut driver, _, _) = driver();
        assert_eq!(driver.send(Bytes::from_static(b"x"), 0).unwrap(), Outcome::Error);

        let (mut driver, _, _) = powered();
        assert_eq!(driver.send(Bytes::from_static(b"abc"), 0).unwrap(), Outcome::Ok);
        assert_eq!(driver.state(), State::TxActive);
        assert_eq!(driver.status().tx.power, 0x7f);
        assert_eq!(driver.send(Bytes::from_static(b"abc"), 0).unwrap(), Outcome::Busy);
    }

    #[test]
    fn test_packet_sent_completes_transmit() {
        let (mut driver, chip, _) = powered();
        driver.send(Bytes::from_static(b"hello"), 0x10).unwrap();
        chip.chip().raise_ph(PhPend::PACKET_SENT);
        driver.on_interrupt().unwrap();

        assert_eq!(driver.state(), State::RxIdle);
        assert_eq!(driver.status().tx.packets, 1);
        assert!(driver
            .take_notifications()
            .contains(&Notification::SendComplete(SendCondition::Ok)));
    }

    #[test]
    fn test_receive_notifies_buffer_and_rssi() {
        let (mut driver, chip, _) = powered();
        {
            let mut chip = chip.chip();
            chip.latched_rssi = 0x55;
            chip.load_rx(&[3, 0xde, 0xad, 0xbe], 3);
            chip.raise_modem(ModemPend::SYNC_DETECT);
            chip.raise_ph(PhPend::PACKET_RX);
        }
        driver.on_interrupt().unwrap();

        assert_eq!(driver.state(), State::RxIdle);
        assert_eq!(driver.status().rx.packets, 1);
        assert_eq!(driver.cca(), 0x55);
        assert!(!driver.channel_clear());
        assert_eq!(
            driver.take_notifications(),
            vec![Notification::Receive {
                buffer: Bytes::from_static(&[3, 0xde, 0xad, 0xbe]),
                rssi: 0x55
            }]
        );
    }

    #[test]
    fn test_clear_status_returns_previous() {
        let (mut driver, _, _) = powered();
        let before = driver.clear_status();
        assert_eq!(before.unshuts, 1);
        assert_eq!(driver.status().unshuts, 0);
        assert_eq!(driver.status().state, State::RxIdle);
    }

    #[test]
    fn test_standby_from_shutdown_then_on() {
        let (mut driver, chip, sched) = driver();
        assert_eq!(driver.control("STANDBY").unwrap(), Outcome::Ok);
        assert_eq!(driver.state(), State::Standby);
        assert!(sched.take_deferred().is_empty());
        assert_eq!(
            driver.take_notifications(),
            vec![Notification::NewStatus("STANDBY")]
        );
        assert!(chip.chip().powered);

        assert_eq!(driver.control("TURNON").unwrap(), Outcome::Ok);
        assert_eq!(driver.state(), State::RxIdle);
    }

    #[test]
    fn test_power_down_mid_power_up() {
        let (mut driver, chip, sched) = driver();
        driver.control("TURNON").unwrap();
        driver.power_down().unwrap();
        assert!(!chip.chip().powered);
        assert!(sched.armed().is_empty());
        assert_eq!(driver.state(), State::ShutDown);
        assert_eq!(
            driver.take_notifications(),
            vec![Notification::NewStatus("OFF")]
        );

        // the driver is not wedged: a new power-up runs to completion
        assert_eq!(driver.control("TURNON").unwrap(), Outcome::Ok);
        while let Some(event) = sched.next_event() {
            driver.on_scheduler_event(event).unwrap();
        }
        assert_eq!(driver.state(), State::RxIdle);
        assert!(chip.chip().powered);
        assert_eq!(driver.status().unshuts, 2);
    }

    #[test]
    fn test_power_down_when_off_is_quiet() {
        let (mut driver, _chip, _sched) = driver();
        driver.power_down().unwrap();
        assert_eq!(driver.state(), State::ShutDown);
        assert!(driver.take_notifications().is_empty());
    }

    #[test]
    fn test_status_display() {
        let (driver, _, _) = powered();
        let text = driver.status().to_string();
        assert!(text.starts_with("status ON (RxIdle), unshuts 1"));
        assert!(text.contains("tx: packets 0"));
    }
}
