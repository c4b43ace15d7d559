//! # Si446x Command Layer
//!
//! [`Radio`] wraps a [`Transport`] with typed Si446x API commands
//! (revB1B). It owns the chip-side notion of the active channel and is the
//! one place transport failures are absorbed.
//!
//! ## Error Absorption
//!
//! Action handlers must run to completion, so no method here returns a
//! `Result`. A failed exchange is logged (rate limited per category) and a
//! safe default is returned instead: zero FIFO counts, zero packet length,
//! empty pending flags. A missing CTS becomes an
//! [`Anomaly::HardwareAckTimeout`] queued for the driver to trace; the flow
//! continues.
//!
//! ## Command Encodings
//!
//! ```text
//! POWER_UP       02 01 03 xo_freq (u32, big-endian)
//! SET_PROPERTY   11 group count start data...
//! FIFO_INFO      15 flags              -> rx_count tx_space
//! PACKET_INFO    16 00                 -> len_hi len_lo
//! GET_INT_STATUS 20 ph_clr modem_clr chip_clr -> 8 bytes
//! GET_CHIP_STATUS 23 ff                -> chip_pend chip_status err err_cmd
//! START_TX       31 ch 30 len_hi len_lo
//! START_RX       32 ch 00 len_hi len_lo 00 03 03
//! CHANGE_STATE   34 state
//! ```

use crate::constants::{DEFAULT_XO_FREQ, MAX_GROUP_WRITE};
use crate::error::Anomaly;
use crate::radio::config::ConfigList;
use crate::radio::hal::{HalError, Transport};
use crate::radio::irq::{ClearMask, FastRegisters, IntStatus};
use crate::util::logging::{log_fifo_hex, ThrottleManager};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Si446x API opcodes used by the driver
pub mod opcode {
    pub const PART_INFO: u8 = 0x01;
    pub const POWER_UP: u8 = 0x02;
    pub const SET_PROPERTY: u8 = 0x11;
    pub const FIFO_INFO: u8 = 0x15;
    pub const PACKET_INFO: u8 = 0x16;
    pub const GET_INT_STATUS: u8 = 0x20;
    pub const GET_CHIP_STATUS: u8 = 0x23;
    pub const START_TX: u8 = 0x31;
    pub const START_RX: u8 = 0x32;
    pub const CHANGE_STATE: u8 = 0x34;
}

/// Property groups written by the driver
pub mod group {
    pub const INT_CTL: u8 = 0x01;
    pub const FRR_CTL: u8 = 0x02;
    pub const PKT: u8 = 0x12;
    pub const PA: u8 = 0x22;
}

/// FRR source selectors: current state, PH pending, modem pending, latched RSSI
pub const FRR_MODES: [u8; 4] = [9, 4, 6, 10];

/// INT_CTL_ENABLE, PH, MODEM, CHIP enables
pub const INT_CTL_ENABLES: [u8; 4] = [0x03, 0x3b, 0x23, 0x00];

/// PKT_RX_THRESHOLD property index and value
pub const PKT_RX_THRESHOLD: (u8, u8) = (0x0c, 0x10);

const FIFO_RX_RESET: u8 = 0x02;
const FIFO_TX_RESET: u8 = 0x01;

/// Si446x operating states, as used by CHANGE_STATE and FRR A
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChipState {
    NoChange = 0,
    Sleep = 1,
    SpiActive = 2,
    Ready = 3,
    Ready2 = 4,
    TxTune = 5,
    RxTune = 6,
    Tx = 7,
    Rx = 8,
}

/// FIFO_INFO response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FifoInfo {
    /// Bytes waiting in the RX FIFO
    pub rx_count: usize,
    /// Free bytes in the TX FIFO
    pub tx_space: usize,
}

/// GET_CHIP_STATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChipStatus {
    pub chip_pend: u8,
    pub chip_status: u8,
    pub cmd_err_status: u8,
    pub cmd_err_cmd_id: u8,
}

/// PART_INFO response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PartInfo {
    pub chip_rev: u8,
    pub part: u16,
    pub pbuild: u8,
    pub id: u16,
    pub customer: u8,
    pub rom_id: u8,
}

/// Typed Si446x command interface over a transport
pub struct Radio<T: Transport> {
    transport: T,
    channel: u8,
    xo_freq: u32,
    throttles: ThrottleManager,
    anomalies: Vec<Anomaly>,
}

impl<T: Transport> Radio<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channel: 0,
            xo_freq: DEFAULT_XO_FREQ,
            throttles: ThrottleManager::new(),
            anomalies: Vec::new(),
        }
    }

    /// Crystal frequency passed with POWER_UP
    pub fn with_xo_freq(mut self, xo_freq: u32) -> Self {
        self.xo_freq = xo_freq;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Anomalies observed since the last call
    pub fn take_anomalies(&mut self) -> Vec<Anomaly> {
        std::mem::take(&mut self.anomalies)
    }

    fn absorb<R>(&mut self, what: &'static str, result: Result<R, HalError>, default: R) -> R {
        match result {
            Ok(value) => value,
            Err(HalError::CtsTimeout) => {
                self.ack_timeout(what);
                default
            }
            Err(e) => {
                if self.throttles.allow("transport", 1000, 5) {
                    log::warn!("radio {} failed: {}", what, e);
                }
                default
            }
        }
    }

    fn ack_timeout(&mut self, what: &str) {
        if self.throttles.allow("cts", 1000, 5) {
            log::warn!("radio {}: CTS not observed", what);
        }
        self.anomalies
            .push(Anomaly::HardwareAckTimeout(what.to_string()));
    }

    fn send(&mut self, what: &'static str, cmd: &[u8]) {
        let result = self.transport.command(cmd);
        self.absorb(what, result, ());
    }

    fn query(&mut self, what: &'static str, cmd: &[u8], len: usize) -> Vec<u8> {
        let sent = self.transport.command(cmd);
        if let Err(e) = sent {
            return self.absorb(what, Err(e), Vec::new());
        }
        let rsp = self.transport.response(len);
        self.absorb(what, rsp, Vec::new())
    }

    /// Current CTS level; a read failure counts as "not ready"
    pub fn cts(&mut self) -> bool {
        let level = self.transport.cts();
        self.absorb("cts", level, false)
    }

    /// Poll CTS for up to `wait_ms`, 1 ms apart. A miss is recorded against
    /// `what` and the caller carries on.
    pub fn wait_cts(&mut self, wait_ms: u32, what: &str) -> bool {
        for _ in 0..wait_ms {
            if self.cts() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if self.cts() {
            return true;
        }
        self.ack_timeout(what);
        false
    }

    /// Record a missing CTS before a command that needs the chip idle
    pub fn check_cts(&mut self, what: &str) -> bool {
        let ready = self.cts();
        if !ready {
            self.ack_timeout(what);
        }
        ready
    }

    pub fn power_up(&mut self) {
        let xo = self.xo_freq.to_be_bytes();
        self.send(
            "power_up",
            &[opcode::POWER_UP, 0x01, 0x03, xo[0], xo[1], xo[2], xo[3]],
        );
    }

    pub fn read_part_info(&mut self) -> PartInfo {
        let rsp = self.query("part_info", &[opcode::PART_INFO], 8);
        if rsp.len() < 8 {
            return PartInfo::default();
        }
        PartInfo {
            chip_rev: rsp[0],
            part: u16::from_be_bytes([rsp[1], rsp[2]]),
            pbuild: rsp[3],
            id: u16::from_be_bytes([rsp[4], rsp[5]]),
            customer: rsp[6],
            rom_id: rsp[7],
        }
    }

    /// Point the fast response registers at the sources the driver reads
    pub fn config_frr(&mut self) {
        self.set_property(group::FRR_CTL, 0, &FRR_MODES);
    }

    /// Stream every string of a config list to the chip, one command each
    pub fn send_config(&mut self, list: &ConfigList) {
        for cmd in list.iter() {
            self.send("send_config", cmd);
        }
        log::debug!("sent {} config strings from {} list", list.len(), list.name());
    }

    /// Write up to [`MAX_GROUP_WRITE`] contiguous properties
    pub fn set_property(&mut self, group: u8, start: u8, data: &[u8]) {
        if data.len() > MAX_GROUP_WRITE {
            log::error!(
                "set_property 0x{:02x}:0x{:02x} too long ({} > {}), not sent",
                group,
                start,
                data.len(),
                MAX_GROUP_WRITE
            );
            return;
        }
        let mut cmd = vec![opcode::SET_PROPERTY, group, data.len() as u8, start];
        cmd.extend_from_slice(data);
        self.send("set_property", &cmd);
    }

    /// PA power level, 0x7f is the maximum (+20 dBm)
    pub fn set_power(&mut self, level: u8) {
        self.set_property(group::PA, 1, &[level & 0x7f]);
    }

    /// Record the channel passed with later START_RX and START_TX. Nothing
    /// is sent to the chip.
    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Clear every pending interrupt (short GET_INT_STATUS)
    pub fn clear_interrupts(&mut self) {
        self.send("clear_interrupts", &[opcode::GET_INT_STATUS]);
    }

    /// Read pending interrupts as they were before clearing `mask`
    pub fn get_clear_interrupts(&mut self, mask: ClearMask) -> IntStatus {
        let [ph, modem, chip] = mask.to_wire();
        let rsp = self.query(
            "get_int_status",
            &[opcode::GET_INT_STATUS, ph, modem, chip],
            IntStatus::LEN,
        );
        IntStatus::from_bytes(&rsp)
    }

    pub fn fifo_info(&mut self, rx_flush: bool, tx_flush: bool) -> FifoInfo {
        let mut flags = 0;
        if rx_flush {
            flags |= FIFO_RX_RESET;
        }
        if tx_flush {
            flags |= FIFO_TX_RESET;
        }
        let rsp = self.query("fifo_info", &[opcode::FIFO_INFO, flags], 2);
        match rsp.as_slice() {
            [rx, tx, ..] => FifoInfo {
                rx_count: *rx as usize,
                tx_space: *tx as usize,
            },
            _ => FifoInfo::default(),
        }
    }

    /// Payload length of the last received packet (length byte excluded)
    pub fn packet_info(&mut self) -> u16 {
        let rsp = self.query("packet_info", &[opcode::PACKET_INFO, 0x00], 2);
        match rsp.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        }
    }

    /// Arm the receiver; timeout stays put, valid and invalid packets go READY
    pub fn start_rx(&mut self, len: u16) {
        let [hi, lo] = len.to_be_bytes();
        let cmd = [
            opcode::START_RX,
            self.channel,
            0x00,
            hi,
            lo,
            ChipState::NoChange as u8,
            ChipState::Ready as u8,
            ChipState::Ready as u8,
        ];
        self.send("start_rx", &cmd);
    }

    /// Start transmitting `len` bytes, returning to READY when done
    pub fn start_tx(&mut self, len: u16) {
        let [hi, lo] = len.to_be_bytes();
        let condition = (ChipState::Ready as u8) << 4;
        self.send(
            "start_tx",
            &[opcode::START_TX, self.channel, condition, hi, lo],
        );
    }

    /// Force a chip state, then wait up to `wait_ms` for CTS
    pub fn change_state(&mut self, state: ChipState, wait_ms: u32) {
        self.send("change_state", &[opcode::CHANGE_STATE, state as u8]);
        if wait_ms > 0 {
            self.wait_cts(wait_ms, "change_state");
        }
    }

    /// Chip status without clearing anything
    pub fn get_chip_status(&mut self) -> ChipStatus {
        let rsp = self.query("get_chip_status", &[opcode::GET_CHIP_STATUS, 0xff], 4);
        match rsp.as_slice() {
            [pend, status, err, err_cmd, ..] => ChipStatus {
                chip_pend: *pend,
                chip_status: *status,
                cmd_err_status: *err,
                cmd_err_cmd_id: *err_cmd,
            },
            _ => ChipStatus::default(),
        }
    }

    pub fn fast_all(&mut self) -> FastRegisters {
        let raw = self.transport.read_fast_registers(0, 4);
        let raw = self.absorb("fast_all", raw, Vec::new());
        FastRegisters::from_bytes(&raw)
    }

    pub fn fast_latched_rssi(&mut self) -> u8 {
        let raw = self.transport.read_fast_registers(3, 1);
        let raw = self.absorb("fast_latched_rssi", raw, Vec::new());
        raw.first().copied().unwrap_or(0)
    }

    pub fn read_rx_fifo(&mut self, len: usize) -> Vec<u8> {
        let data = self.transport.read_fifo(len);
        let data = self.absorb("read_rx_fifo", data, Vec::new());
        log_fifo_hex("rx fifo", &data);
        data
    }

    pub fn write_tx_fifo(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        log_fifo_hex("tx fifo", data);
        let result = self.transport.write_fifo(data);
        self.absorb("write_tx_fifo", result, ());
    }

    /// Assert SDN
    pub fn shutdown(&mut self) {
        let result = self.transport.power_enable(false);
        self.absorb("shutdown", result, ());
    }

    /// Release SDN
    pub fn unshutdown(&mut self) {
        let result = self.transport.power_enable(true);
        self.absorb("unshutdown", result, ());
    }

    pub fn enable_interrupts(&mut self) {
        let result = self.transport.interrupt_enable(true);
        self.absorb("enable_interrupts", result, ());
    }

    pub fn disable_interrupts(&mut self) {
        let result = self.transport.interrupt_enable(false);
        self.absorb("disable_interrupts", result, ());
    }
}
