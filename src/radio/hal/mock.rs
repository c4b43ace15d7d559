//! Simulated Si446x for tests and hardware-less runs
//!
//! [`MockChip`] interprets the subset of the Si446x command set the driver
//! uses: FIFO accounting, interrupt pending/clear semantics, packet length,
//! chip state changes and the fast response registers. [`MockTransport`]
//! shares one chip behind `Arc<Mutex<..>>` so a test can keep a clone and
//! inspect or stimulate the chip while the driver owns the transport.

use super::{HalError, Transport};
use crate::constants::{RX_FIFO_MAX, TX_FIFO_MAX};
use crate::radio::chip::ChipState;
use crate::radio::irq::{ChipPend, ModemPend, PhPend};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Simulated chip state
#[derive(Debug, Clone)]
pub struct MockChip {
    /// SDN released
    pub powered: bool,
    /// NIRQ edge interrupt armed
    pub irq_enabled: bool,
    /// Level reported on the CTS line
    pub cts: bool,
    /// Crystal frequency passed with the last POWER_UP
    pub xo_freq: Option<u32>,
    /// Current chip state, a [`ChipState`] discriminant
    pub state: u8,
    pub ph_pend: PhPend,
    pub modem_pend: ModemPend,
    pub chip_pend: ChipPend,
    /// Flags that re-assert immediately after every clear
    pub sticky_ph: PhPend,
    pub sticky_modem: ModemPend,
    /// Bytes sitting in the TX FIFO, not yet sent
    pub tx_fifo: Vec<u8>,
    /// Every byte ever written to the TX FIFO, in order
    pub tx_history: Vec<u8>,
    /// Size of every TX FIFO write, in order
    pub tx_writes: Vec<usize>,
    /// Free space reported by FIFO_INFO at the time of each TX FIFO write
    pub tx_space_at_write: Vec<usize>,
    /// Length passed with the last START_TX
    pub tx_length: Option<u16>,
    pub rx_fifo: VecDeque<u8>,
    /// Length reported by PACKET_INFO
    pub packet_length: u16,
    /// Channel passed with the last START_RX/START_TX
    pub channel: u8,
    pub latched_rssi: u8,
    /// Properties written by SET_PROPERTY, keyed by (group, index)
    pub properties: HashMap<(u8, u8), u8>,
    /// Every command sent, in order
    pub commands: Vec<Vec<u8>>,
    /// Number of upcoming transport calls that fail
    pub fail_next: usize,
    /// FIFO overflow or underflow observed
    pub fifo_fault: bool,
    response: Vec<u8>,
}

impl Default for MockChip {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChip {
    pub fn new() -> Self {
        Self {
            powered: false,
            irq_enabled: false,
            cts: true,
            xo_freq: None,
            state: ChipState::NoChange as u8,
            ph_pend: PhPend::empty(),
            modem_pend: ModemPend::empty(),
            chip_pend: ChipPend::empty(),
            sticky_ph: PhPend::empty(),
            sticky_modem: ModemPend::empty(),
            tx_fifo: Vec::new(),
            tx_history: Vec::new(),
            tx_writes: Vec::new(),
            tx_space_at_write: Vec::new(),
            tx_length: None,
            rx_fifo: VecDeque::new(),
            packet_length: 0,
            channel: 0,
            latched_rssi: 0,
            properties: HashMap::new(),
            commands: Vec::new(),
            fail_next: 0,
            fifo_fault: false,
            response: Vec::new(),
        }
    }

    /// Free space in the TX FIFO
    pub fn tx_space(&self) -> usize {
        TX_FIFO_MAX.saturating_sub(self.tx_fifo.len())
    }

    /// Commands sent with the given opcode
    pub fn commands_with(&self, opcode: u8) -> Vec<Vec<u8>> {
        self.commands
            .iter()
            .filter(|cmd| cmd.first() == Some(&opcode))
            .cloned()
            .collect()
    }

    /// Load a received packet into the RX FIFO. `reported` is the payload
    /// length PACKET_INFO will return (the length byte is not counted).
    pub fn load_rx(&mut self, bytes: &[u8], reported: u16) {
        let room = RX_FIFO_MAX.saturating_sub(self.rx_fifo.len());
        if bytes.len() > room {
            self.fifo_fault = true;
        }
        self.rx_fifo.extend(bytes.iter().take(room));
        self.packet_length = reported;
    }

    /// Simulate the modem sending `n` bytes out of the TX FIFO
    pub fn transmit(&mut self, n: usize) {
        let n = n.min(self.tx_fifo.len());
        self.tx_fifo.drain(..n);
    }

    pub fn raise_ph(&mut self, flags: PhPend) {
        self.ph_pend |= flags;
    }

    pub fn raise_modem(&mut self, flags: ModemPend) {
        self.modem_pend |= flags;
    }

    fn power_off(&mut self) {
        self.powered = false;
        self.state = ChipState::NoChange as u8;
        self.ph_pend = PhPend::empty();
        self.modem_pend = ModemPend::empty();
        self.chip_pend = ChipPend::empty();
        self.tx_fifo.clear();
        self.rx_fifo.clear();
        self.response.clear();
    }

    fn take_failure(&mut self, what: &str) -> Result<(), HalError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(HalError::Spi(format!("injected failure during {}", what)));
        }
        Ok(())
    }

    fn execute(&mut self, cmd: &[u8]) {
        let Some(&opcode) = cmd.first() else {
            return;
        };
        let arg = |i: usize| cmd.get(i).copied().unwrap_or(0);
        self.response.clear();

        match opcode {
            // PART_INFO
            0x01 => self.response = vec![0x11, 0x44, 0x63, 0x00, 0x00, 0x00, 0x00, 0x06],
            // POWER_UP
            0x02 => {
                self.xo_freq = Some(u32::from_be_bytes([arg(3), arg(4), arg(5), arg(6)]));
                self.state = ChipState::Ready as u8;
                self.chip_pend |= ChipPend::CHIP_READY;
            }
            // SET_PROPERTY
            0x11 => {
                let group = arg(1);
                let start = arg(3);
                for (i, &value) in cmd.iter().skip(4).enumerate() {
                    self.properties.insert((group, start.wrapping_add(i as u8)), value);
                }
            }
            // GET_PROPERTY
            0x12 => {
                let group = arg(1);
                let start = arg(3);
                self.response = (0..arg(2))
                    .map(|i| {
                        self.properties
                            .get(&(group, start.wrapping_add(i)))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect();
            }
            // GPIO_PIN_CFG
            0x13 => self.response = vec![0; 7],
            // FIFO_INFO
            0x15 => {
                if arg(1) & 0x02 != 0 {
                    self.rx_fifo.clear();
                }
                if arg(1) & 0x01 != 0 {
                    self.tx_fifo.clear();
                }
                self.response = vec![self.rx_fifo.len() as u8, self.tx_space() as u8];
            }
            // PACKET_INFO
            0x16 => self.response = self.packet_length.to_be_bytes().to_vec(),
            // GET_INT_STATUS
            0x20 => {
                self.response = vec![
                    0,
                    0,
                    self.ph_pend.bits(),
                    0,
                    self.modem_pend.bits(),
                    0,
                    self.chip_pend.bits(),
                    0,
                ];
                if cmd.len() >= 4 {
                    self.ph_pend &= PhPend::from_bits_truncate(arg(1));
                    self.modem_pend &= ModemPend::from_bits_truncate(arg(2));
                    self.chip_pend &= ChipPend::from_bits_truncate(arg(3));
                } else {
                    self.ph_pend = PhPend::empty();
                    self.modem_pend = ModemPend::empty();
                    self.chip_pend = ChipPend::empty();
                }
                self.ph_pend |= self.sticky_ph;
                self.modem_pend |= self.sticky_modem;
            }
            // GET_CHIP_STATUS
            0x23 => self.response = vec![self.chip_pend.bits(), 0, 0, 0],
            // START_TX
            0x31 => {
                self.channel = arg(1);
                self.tx_length = Some(u16::from_be_bytes([arg(3), arg(4)]));
                self.state = ChipState::Tx as u8;
            }
            // START_RX
            0x32 => {
                self.channel = arg(1);
                self.state = ChipState::Rx as u8;
            }
            // CHANGE_STATE
            0x34 => self.state = arg(1),
            other => log::trace!("mock chip ignoring opcode 0x{:02x}", other),
        }
    }
}

/// Transport backed by a shared [`MockChip`]
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    chip: Arc<Mutex<MockChip>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the simulated chip for inspection or stimulus
    pub fn chip(&self) -> MutexGuard<'_, MockChip> {
        self.chip.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MockTransport {
    fn command(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        let mut chip = self.chip();
        chip.take_failure("command")?;
        chip.commands.push(bytes.to_vec());
        chip.execute(bytes);
        Ok(())
    }

    fn response(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        let mut chip = self.chip();
        chip.take_failure("response")?;
        let mut out = std::mem::take(&mut chip.response);
        out.resize(len, 0);
        Ok(out)
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        let mut chip = self.chip();
        chip.take_failure("read_fifo")?;
        if len > chip.rx_fifo.len() {
            chip.fifo_fault = true;
        }
        let take = len.min(chip.rx_fifo.len());
        let mut out: Vec<u8> = chip.rx_fifo.drain(..take).collect();
        out.resize(len, 0);
        Ok(out)
    }

    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        let mut chip = self.chip();
        chip.take_failure("write_fifo")?;
        let space = chip.tx_space();
        chip.tx_writes.push(bytes.len());
        chip.tx_space_at_write.push(space);
        if bytes.len() > space {
            chip.fifo_fault = true;
        }
        let accepted = &bytes[..bytes.len().min(space)];
        chip.tx_fifo.extend_from_slice(accepted);
        chip.tx_history.extend_from_slice(accepted);
        Ok(())
    }

    fn read_fast_registers(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HalError> {
        let mut chip = self.chip();
        chip.take_failure("read_fast_registers")?;
        let frr = [
            chip.state,
            chip.ph_pend.bits(),
            chip.modem_pend.bits(),
            chip.latched_rssi,
        ];
        Ok((offset..offset + len)
            .map(|i| frr.get(i).copied().unwrap_or(0))
            .collect())
    }

    fn power_enable(&mut self, on: bool) -> Result<(), HalError> {
        let mut chip = self.chip();
        chip.take_failure("power_enable")?;
        if on {
            chip.powered = true;
        } else {
            chip.power_off();
        }
        Ok(())
    }

    fn interrupt_enable(&mut self, on: bool) -> Result<(), HalError> {
        let mut chip = self.chip();
        chip.take_failure("interrupt_enable")?;
        chip.irq_enabled = on;
        Ok(())
    }

    fn cts(&mut self) -> Result<bool, HalError> {
        Ok(self.chip().cts)
    }
}
