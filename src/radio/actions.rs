//! # Action Handlers
//!
//! One handler per [`Action`]. Handlers mutate the [`DriverContext`], talk
//! to the chip through [`Radio`], arm or cancel the single driver timer and
//! queue notifications. None of them can fail: the chip layer absorbs
//! transport errors, and packet-level problems are counted and recorded as
//! anomalies.
//!
//! ## FIFO Streaming
//!
//! A transmit larger than the 64-byte TX FIFO is streamed: `TxStart` writes
//! as much as fits, then every `TxThresh` (TX FIFO almost empty) tops it up
//! with at most the free space FIFO_INFO reports. Receive is the mirror
//! image: every `RxThresh` drains what FIFO_INFO says is waiting, once.

use crate::constants::{SLEEP_WAIT_MS, TX_FIFO_MAX};
use crate::error::Anomaly;
use crate::radio::chip::{group, ChipState, PartInfo, Radio, INT_CTL_ENABLES, PKT_RX_THRESHOLD};
use crate::radio::config::{ConfigList, TimingConfig};
use crate::radio::fsm::{Action, Event};
use crate::radio::hal::Transport;
use crate::radio::timer::{Scheduler, TimerHandle};
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Receive side counters and the packet being assembled
#[derive(Debug, Default)]
pub struct RxContext {
    pub packets: u32,
    pub timeouts: u32,
    pub len_errors: u32,
    pub sync_errors: u32,
    pub crc_errors: u32,
    /// Latched RSSI of the current/last packet
    pub rssi: u8,
    /// Bytes drained for the current packet
    pub offset: usize,
    pub buffer: BytesMut,
}

/// Transmit side counters and the packet in flight
#[derive(Debug, Default)]
pub struct TxContext {
    pub packets: u32,
    pub timeouts: u32,
    /// Transmits abandoned by a forced power-down or standby
    pub errors: u32,
    pub power: u8,
    /// Bytes of `buffer` already written to the FIFO
    pub offset: usize,
    /// Present exactly while a transmit is in flight
    pub buffer: Option<Bytes>,
}

#[derive(Debug, Default)]
pub struct IocContext {
    /// Power-ons from shutdown
    pub unshuts: u32,
}

/// Mutable driver state, exclusively owned by the driver
#[derive(Debug, Default)]
pub struct DriverContext {
    pub rx: RxContext,
    pub tx: TxContext,
    pub ioc: IocContext,
    pub active_timer: Option<TimerHandle>,
    /// Event handed to the scheduler and not yet delivered
    pub deferred: Option<Event>,
    /// PART_INFO read during the last configuration
    pub part: Option<PartInfo>,
}

impl DriverContext {
    /// Zero all counters; buffers, rssi and power are kept
    pub fn clear_counters(&mut self) {
        let rx = &mut self.rx;
        rx.packets = 0;
        rx.timeouts = 0;
        rx.len_errors = 0;
        rx.sync_errors = 0;
        rx.crc_errors = 0;
        let tx = &mut self.tx;
        tx.packets = 0;
        tx.timeouts = 0;
        tx.errors = 0;
        self.ioc.unshuts = 0;
    }
}

/// Outcome reported with a send-complete notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendCondition {
    Ok,
    Timeout,
}

impl fmt::Display for SendCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendCondition::Ok => write!(f, "ok"),
            SendCondition::Timeout => write!(f, "timeout"),
        }
    }
}

/// Application-visible notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewStatus(&'static str),
    Receive { buffer: Bytes, rssi: u8 },
    SendComplete(SendCondition),
}

/// Side effects collected during one dispatch
#[derive(Debug, Default)]
pub struct Effects {
    pub notifications: Vec<Notification>,
    pub anomalies: Vec<Anomaly>,
    /// An action asked for a status notification once the new state commits
    pub status_changed: bool,
}

/// Settings the handlers read
#[derive(Debug, Clone)]
pub struct ActionSettings {
    pub timing: TimingConfig,
    pub channel: u8,
    /// Generic list first, then device-local
    pub config_lists: Vec<ConfigList>,
}

/// Everything one dispatch's handlers may touch
pub struct Actions<'a, T: Transport, S: Scheduler> {
    pub ctx: &'a mut DriverContext,
    pub radio: &'a mut Radio<T>,
    pub scheduler: &'a mut S,
    pub settings: &'a ActionSettings,
    pub effects: &'a mut Effects,
}

impl<'a, T: Transport, S: Scheduler> Actions<'a, T, S> {
    /// Run the handler for `action`, triggered by `event`
    pub fn run(&mut self, action: Action, event: Event) {
        log::trace!("action {:?} for {:?}", action, event);
        match action {
            Action::Unshut => self.unshut(),
            Action::Config => self.config(event),
            Action::Ready => self.ready(),
            Action::PwrUp => self.pwr_up(),
            Action::PwrDn => self.pwr_dn(),
            Action::RxStart => self.rx_start(),
            Action::RxDrainFifo => self.rx_drain_fifo(),
            Action::RxComplete => self.rx_complete(),
            Action::RxCrcCount => self.rx_crc_count(),
            Action::RxTimeout => self.rx_timeout(),
            Action::TxStart => self.tx_start(),
            Action::TxFillFifo => self.tx_fill_fifo(),
            Action::TxComplete => self.tx_complete(),
            Action::TxTimeout => self.tx_timeout(),
            Action::ClearSync => self.clear_sync(),
            Action::GotoStandby => self.goto_standby(),
            Action::Nop => {}
        }
    }

    fn start_timer(&mut self, delay: Duration) {
        self.stop_timer();
        self.ctx.active_timer = Some(self.scheduler.schedule(delay));
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.ctx.active_timer.take() {
            timer.cancel();
        }
    }

    fn notify(&mut self, notification: Notification) {
        self.effects.notifications.push(notification);
    }

    /// Flush both FIFOs, clear interrupts and arm the receiver
    fn rx_on(&mut self) {
        self.stop_timer();
        self.radio.fifo_info(true, true);
        self.radio.clear_interrupts();
        self.radio.start_rx(0);
    }

    /// A transmit cut short by power-down or standby
    fn abandon_tx(&mut self) {
        if self.ctx.tx.buffer.take().is_some() {
            self.ctx.tx.errors += 1;
            log::warn!("transmit abandoned at offset {}", self.ctx.tx.offset);
        }
    }

    fn unshut(&mut self) {
        self.start_timer(self.settings.timing.power_on_wait());
        self.radio.unshutdown();
        self.ctx.ioc.unshuts += 1;
    }

    fn pwr_up(&mut self) {
        self.radio.check_cts("power_up");
        self.start_timer(self.settings.timing.power_up_wait());
        self.radio.power_up();
    }

    fn config(&mut self, event: Event) {
        if event != Event::WaitDone {
            // Straight from shutdown to standby: bring the chip up with
            // bounded CTS waits in place of the power-up timers.
            self.radio.unshutdown();
            self.ctx.ioc.unshuts += 1;
            self.radio
                .wait_cts(self.settings.timing.power_on_wait_ms as u32, "unshut");
            self.radio.power_up();
            self.radio
                .wait_cts(self.settings.timing.power_up_wait_ms as u32, "power_up");
        }

        let part = self.radio.read_part_info();
        log::info!(
            "si{:04x} rev {} rom {} configuring",
            part.part,
            part.chip_rev,
            part.rom_id
        );
        self.ctx.part = Some(part);

        self.radio.config_frr();
        for list in &self.settings.config_lists {
            self.radio.send_config(list);
        }
        self.radio.set_property(group::INT_CTL, 0, &INT_CTL_ENABLES);
        self.radio
            .set_property(group::PKT, PKT_RX_THRESHOLD.0, &[PKT_RX_THRESHOLD.1]);

        if event == Event::WaitDone {
            self.ctx.deferred = Some(Event::ConfigDone);
            self.scheduler.defer(Event::ConfigDone);
        } else {
            self.radio.change_state(ChipState::Sleep, SLEEP_WAIT_MS);
            self.effects.status_changed = true;
        }
    }

    /// The channel is only remembered here; START_RX in `rx_on` is the
    /// first command that carries it.
    fn ready(&mut self) {
        self.radio.set_channel(self.settings.channel);
        self.radio.clear_interrupts();
        self.radio.enable_interrupts();
        self.rx_on();
        self.effects.status_changed = true;
    }

    fn pwr_dn(&mut self) {
        self.stop_timer();
        self.radio.disable_interrupts();
        self.radio.shutdown();
        self.abandon_tx();
        self.effects.status_changed = true;
    }

    fn goto_standby(&mut self) {
        self.stop_timer();
        self.radio.change_state(ChipState::Sleep, SLEEP_WAIT_MS);
        self.abandon_tx();
        self.effects.status_changed = true;
    }

    fn rx_start(&mut self) {
        self.start_timer(self.settings.timing.rx_wait());
        self.ctx.rx.rssi = self.radio.fast_latched_rssi();
        self.ctx.rx.buffer.clear();
        self.ctx.rx.offset = 0;
    }

    /// One FIFO_INFO, one read of whatever it reports
    fn rx_drain_fifo(&mut self) {
        let info = self.radio.fifo_info(false, false);
        if info.rx_count == 0 {
            return;
        }
        let data = self.radio.read_rx_fifo(info.rx_count);
        self.ctx.rx.buffer.extend_from_slice(&data);
        self.ctx.rx.offset += data.len();
    }

    fn rx_complete(&mut self) {
        self.stop_timer();
        self.rx_drain_fifo();

        let expected = self.radio.packet_info() as usize + 1;
        let rx = &mut self.ctx.rx;
        if rx.offset == expected {
            rx.packets += 1;
            let notification = Notification::Receive {
                buffer: Bytes::copy_from_slice(&rx.buffer),
                rssi: rx.rssi,
            };
            self.notify(notification);
        } else {
            rx.len_errors += 1;
            log::warn!(
                "rx length mismatch: drained {} bytes, chip reported {}",
                rx.offset,
                expected
            );
            self.effects.anomalies.push(Anomaly::ProtocolLengthMismatch {
                received: rx.offset,
                expected,
            });
        }
        self.rx_on();
    }

    fn rx_crc_count(&mut self) {
        self.stop_timer();
        self.ctx.rx.crc_errors += 1;
        self.effects.anomalies.push(Anomaly::CrcMismatch);
        self.radio.fifo_info(true, false);
        self.radio.change_state(ChipState::Sleep, SLEEP_WAIT_MS);
        self.radio.clear_interrupts();
        self.rx_on();
    }

    fn rx_timeout(&mut self) {
        self.ctx.rx.timeouts += 1;
        log::debug!("rx timeout after {} bytes", self.ctx.rx.offset);
        self.rx_on();
    }

    fn clear_sync(&mut self) {
        self.radio.fifo_info(true, false);
        self.ctx.rx.sync_errors += 1;
        self.rx_on();
    }

    fn tx_start(&mut self) {
        let Some(buffer) = self.ctx.tx.buffer.clone() else {
            log::error!("transmit started with no buffer");
            return;
        };

        let info = self.radio.fifo_info(false, true);
        if info.tx_space != TX_FIFO_MAX {
            log::debug!("tx fifo not empty after flush: {} free", info.tx_space);
        }
        let first = buffer.len().min(info.tx_space);
        self.radio.write_tx_fifo(&buffer[..first]);
        self.ctx.tx.offset = first;

        self.radio.set_power(self.ctx.tx.power);
        self.radio.start_tx(buffer.len() as u16);
        self.start_timer(self.settings.timing.tx_wait());
    }

    /// Top up the TX FIFO, never past the reported free space
    fn tx_fill_fifo(&mut self) {
        let Some(buffer) = self.ctx.tx.buffer.clone() else {
            return;
        };
        let offset = self.ctx.tx.offset;
        let remaining = buffer.len().saturating_sub(offset);
        if remaining == 0 {
            return;
        }

        let info = self.radio.fifo_info(false, false);
        if info.tx_space == TX_FIFO_MAX {
            log::debug!("tx fifo ran dry before refill");
        }
        let chunk = remaining.min(info.tx_space);
        if chunk == 0 {
            return;
        }
        self.radio.write_tx_fifo(&buffer[offset..offset + chunk]);
        self.ctx.tx.offset += chunk;
    }

    fn tx_complete(&mut self) {
        self.stop_timer();
        self.ctx.tx.packets += 1;
        let info = self.radio.fifo_info(false, false);
        if info.tx_space != TX_FIFO_MAX {
            log::warn!("tx complete with {} bytes left in fifo", TX_FIFO_MAX - info.tx_space.min(TX_FIFO_MAX));
        }
        self.ctx.tx.buffer = None;
        self.notify(Notification::SendComplete(SendCondition::Ok));
        self.rx_on();
    }

    fn tx_timeout(&mut self) {
        self.ctx.tx.timeouts += 1;
        self.ctx.tx.buffer = None;
        self.notify(Notification::SendComplete(SendCondition::Timeout));
        self.rx_on();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::hal::MockTransport;
    use crate::radio::timer::ManualScheduler;

    struct Rig {
        ctx: DriverContext,
        radio: Radio<MockTransport>,
        chip: MockTransport,
        sched: ManualScheduler,
        settings: ActionSettings,
        effects: Effects,
    }

    impl Rig {
        fn new() -> Self {
            let chip = MockTransport::new();
            Self {
                ctx: DriverContext::default(),
                radio: Radio::new(chip.clone()),
                chip,
                sched: ManualScheduler::new(),
                settings: ActionSettings {
                    timing: TimingConfig::default(),
                    channel: 0,
                    config_lists: vec![ConfigList::empty("wds"), ConfigList::empty("local")],
                },
                effects: Effects::default(),
            }
        }

        fn run(&mut self, action: Action, event: Event) {
            Actions {
                ctx: &mut self.ctx,
                radio: &mut self.radio,
                scheduler: &mut self.sched,
                settings: &self.settings,
                effects: &mut self.effects,
            }
            .run(action, event);
        }
    }

    #[test]
    fn test_unshut_accumulates() {
        let mut rig = Rig::new();
        rig.run(Action::Unshut, Event::TurnOn);
        rig.run(Action::Unshut, Event::TurnOn);
        assert_eq!(rig.ctx.ioc.unshuts, 2);
        assert!(rig.chip.chip().powered);
        // second arm cancelled the first
        assert_eq!(rig.sched.armed().len(), 1);
    }

    #[test]
    fn test_config_on_power_up_path_defers_config_done() {
        let mut rig = Rig::new();
        rig.run(Action::Config, Event::WaitDone);
        assert_eq!(rig.sched.take_deferred(), vec![Event::ConfigDone]);
        let chip = rig.chip.chip();
        assert_eq!(chip.properties.get(&(group::INT_CTL, 1)), Some(&0x3b));
        assert_eq!(chip.properties.get(&(group::PKT, 0x0c)), Some(&0x10));
        assert_eq!(chip.properties.get(&(group::FRR_CTL, 3)), Some(&10));
    }

    #[test]
    fn test_config_from_shutdown_powers_chip_without_config_done() {
        let mut rig = Rig::new();
        rig.run(Action::Config, Event::Standby);
        assert!(rig.sched.take_deferred().is_empty());
        assert!(rig.chip.chip().powered);
        assert_eq!(rig.chip.chip().state, ChipState::Sleep as u8);
        assert_eq!(rig.ctx.ioc.unshuts, 1);
        assert!(rig.effects.status_changed);
    }

    #[test]
    fn test_rx_drain_reads_once() {
        let mut rig = Rig::new();
        rig.chip.chip().load_rx(&[4, 1, 2], 3);
        rig.run(Action::RxDrainFifo, Event::RxThresh);
        assert_eq!(rig.ctx.rx.offset, 3);
        assert_eq!(&rig.ctx.rx.buffer[..], &[4, 1, 2]);

        // nothing waiting: no read issued
        rig.run(Action::RxDrainFifo, Event::RxThresh);
        assert_eq!(rig.ctx.rx.offset, 3);
    }

    #[test]
    fn test_tx_start_writes_first_chunk_and_arms_timer() {
        let mut rig = Rig::new();
        rig.ctx.tx.buffer = Some(Bytes::from(vec![0xaa; 100]));
        rig.ctx.tx.power = 0x20;
        rig.run(Action::TxStart, Event::Transmit);

        assert_eq!(rig.ctx.tx.offset, TX_FIFO_MAX);
        let chip = rig.chip.chip();
        assert_eq!(chip.tx_writes, vec![TX_FIFO_MAX]);
        assert_eq!(chip.tx_length, Some(100));
        assert_eq!(chip.properties.get(&(group::PA, 1)), Some(&0x20));
        drop(chip);
        assert_eq!(rig.sched.armed().len(), 1);
    }

    #[test]
    fn test_tx_fill_respects_free_space() {
        let mut rig = Rig::new();
        rig.ctx.tx.buffer = Some(Bytes::from(vec![0x55; 100]));
        rig.run(Action::TxStart, Event::Transmit);

        rig.chip.chip().transmit(10);
        rig.run(Action::TxFillFifo, Event::TxThresh);
        assert_eq!(rig.ctx.tx.offset, 74);

        rig.chip.chip().transmit(64);
        rig.run(Action::TxFillFifo, Event::TxThresh);
        assert_eq!(rig.ctx.tx.offset, 100);

        rig.run(Action::TxFillFifo, Event::TxThresh);
        let chip = rig.chip.chip();
        assert_eq!(chip.tx_writes, vec![64, 10, 26]);
        assert!(!chip.fifo_fault);
        assert_eq!(chip.tx_history, vec![0x55; 100]);
    }

    #[test]
    fn test_tx_timeout_notifies_and_rearms() {
        let mut rig = Rig::new();
        rig.ctx.tx.buffer = Some(Bytes::from_static(b"hello"));
        rig.run(Action::TxTimeout, Event::WaitDone);
        assert_eq!(rig.ctx.tx.timeouts, 1);
        assert!(rig.ctx.tx.buffer.is_none());
        assert_eq!(
            rig.effects.notifications,
            vec![Notification::SendComplete(SendCondition::Timeout)]
        );
        assert_eq!(rig.chip.chip().state, ChipState::Rx as u8);
    }

    #[test]
    fn test_pwr_dn_abandons_transmit() {
        let mut rig = Rig::new();
        rig.ctx.tx.buffer = Some(Bytes::from_static(b"x"));
        rig.run(Action::PwrDn, Event::TurnOff);
        assert_eq!(rig.ctx.tx.errors, 1);
        assert!(rig.ctx.tx.buffer.is_none());
        assert!(!rig.chip.chip().powered);
    }

    #[test]
    fn test_crc_count_flushes_and_rearms() {
        let mut rig = Rig::new();
        rig.chip.chip().load_rx(&[1, 2, 3], 2);
        rig.run(Action::RxCrcCount, Event::CrcError);
        assert_eq!(rig.ctx.rx.crc_errors, 1);
        assert_eq!(rig.effects.anomalies, vec![Anomaly::CrcMismatch]);
        assert!(rig.chip.chip().rx_fifo.is_empty());
        assert_eq!(rig.chip.chip().state, ChipState::Rx as u8);
    }

    #[test]
    fn test_clear_counters_keeps_rssi_and_power() {
        let mut ctx = DriverContext::default();
        ctx.rx.packets = 3;
        ctx.rx.rssi = 0x50;
        ctx.tx.power = 0x7f;
        ctx.tx.errors = 2;
        ctx.ioc.unshuts = 4;
        ctx.clear_counters();
        assert_eq!(ctx.rx.packets, 0);
        assert_eq!(ctx.tx.errors, 0);
        assert_eq!(ctx.ioc.unshuts, 0);
        assert_eq!(ctx.rx.rssi, 0x50);
        assert_eq!(ctx.tx.power, 0x7f);
    }
}
