//! # Raspberry Pi Transport
//!
//! `rppal`-backed [`Transport`] for an Si446x wired to a Raspberry Pi 4 or 5.
//!
//! ## Wiring (defaults, BCM numbering)
//!
//! ```text
//! Pi Pin │ BCM GPIO │ Si446x Pin │ Function
//! ───────┼──────────┼────────────┼─────────────
//! 19     │ GPIO 10  │ SDI        │ SPI data out
//! 21     │ GPIO 9   │ SDO        │ SPI data in
//! 23     │ GPIO 11  │ SCLK       │ SPI clock
//! 24     │ GPIO 8   │ nSEL       │ Chip select
//! 36     │ GPIO 16  │ GPIO1      │ CTS (input)
//! 15     │ GPIO 22  │ nIRQ       │ Interrupt (input, falling edge)
//! 12     │ GPIO 18  │ SDN        │ Shutdown (output, high = off)
//! ```
//!
//! ## SPI Framing
//!
//! - command: `opcode, args...`
//! - response: `READ_CMD_BUFF (0x44)` then a CTS byte then the response
//! - FIFO: `READ_RX_FIFO (0x77)` / `WRITE_TX_FIFO (0x66)` followed by data
//! - FRR: `0x50 | 0x51 | 0x53 | 0x57` followed by 1-4 register bytes
//!
//! CTS is polled before every command and response, 1 ms apart, up to
//! [`CTS_POLL_LIMIT`] times. A miss is logged and the exchange proceeds.

use super::{HalError, Transport};
use crate::constants::{CTS_POLL_LIMIT, MAX_RADIO_RSP, TX_FIFO_MAX};
use crate::radio::config::GpioPins;
use crate::util::logging::LogThrottle;
use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
use rppal::spi::{BitOrder, Bus, Mode, SlaveSelect, Spi};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const READ_CMD_BUFF: u8 = 0x44;
const READ_RX_FIFO: u8 = 0x77;
const WRITE_TX_FIFO: u8 = 0x66;
const FRR_OPCODES: [u8; 4] = [0x50, 0x51, 0x53, 0x57];
const SPI_CLOCK_HZ: u32 = 5_000_000;

/// Called from rppal's interrupt thread on every NIRQ falling edge
pub type InterruptCallback = Arc<dyn Fn() + Send + Sync>;

/// Raspberry Pi transport for one Si446x
pub struct RaspberryPiTransport {
    spi: Spi,
    cts_pin: InputPin,
    nirq_pin: InputPin,
    sdn_pin: OutputPin,
    on_interrupt: Option<InterruptCallback>,
    cts_log: LogThrottle,
}

impl RaspberryPiTransport {
    /// Open SPI bus `spi_bus` (0 or 1) and claim the control pins.
    ///
    /// The chip is left in shutdown (SDN high) with the interrupt disarmed.
    pub fn new(spi_bus: u8, pins: &GpioPins) -> Result<Self, HalError> {
        let bus = match spi_bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            _ => {
                return Err(HalError::InvalidConfig(format!(
                    "Invalid SPI bus {}, only 0 and 1 are supported",
                    spi_bus
                )))
            }
        };

        let spi = Spi::new(bus, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)
            .map_err(|e| HalError::Spi(e.to_string()))?;
        spi.set_bit_order(BitOrder::MsbFirst)
            .map_err(|e| HalError::Spi(e.to_string()))?;

        let gpio = Gpio::new().map_err(|e| HalError::Gpio(e.to_string()))?;
        let pin = |n: u8| gpio.get(n).map_err(|e| HalError::Gpio(format!("GPIO {}: {}", n, e)));

        let cts_pin = pin(pins.cts)?.into_input();
        let nirq_pin = pin(pins.nirq)?.into_input_pullup();
        let mut sdn_pin = pin(pins.sdn)?.into_output();
        sdn_pin.set_high();

        log::info!("Raspberry Pi transport initialized:");
        log::info!("  SPI: SPI{} @ {} Hz", spi_bus, SPI_CLOCK_HZ);
        log::info!("  CTS: GPIO {}", pins.cts);
        log::info!("  NIRQ: GPIO {}", pins.nirq);
        log::info!("  SDN: GPIO {}", pins.sdn);

        Ok(Self {
            spi,
            cts_pin,
            nirq_pin,
            sdn_pin,
            on_interrupt: None,
            cts_log: LogThrottle::new(1000, 5),
        })
    }

    /// Install the callback run on every NIRQ falling edge
    pub fn with_interrupt_callback(mut self, callback: InterruptCallback) -> Self {
        self.on_interrupt = Some(callback);
        self
    }

    fn wait_cts(&mut self, what: &str) {
        for _ in 0..CTS_POLL_LIMIT {
            if self.cts_pin.read() == Level::High {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if self.cts_log.allow() {
            log::warn!("CTS not observed before {} after {} ms", what, CTS_POLL_LIMIT);
        }
    }

    fn transfer(&mut self, write: &[u8]) -> Result<Vec<u8>, HalError> {
        let mut read = vec![0u8; write.len()];
        self.spi
            .transfer(&mut read, write)
            .map_err(|e| HalError::Spi(e.to_string()))?;
        Ok(read)
    }
}

impl Transport for RaspberryPiTransport {
    fn command(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        if bytes.len() > MAX_RADIO_RSP {
            return Err(HalError::TooLong {
                len: bytes.len(),
                max: MAX_RADIO_RSP,
            });
        }
        self.wait_cts("command");
        self.spi
            .write(bytes)
            .map_err(|e| HalError::Spi(e.to_string()))?;
        log::trace!("SPI command 0x{:02x}, {} bytes", bytes.first().copied().unwrap_or(0), bytes.len());
        Ok(())
    }

    fn response(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        if len > MAX_RADIO_RSP {
            return Err(HalError::TooLong {
                len,
                max: MAX_RADIO_RSP,
            });
        }
        self.wait_cts("response");
        let mut frame = vec![0u8; len + 2];
        frame[0] = READ_CMD_BUFF;
        let read = self.transfer(&frame)?;
        // read[0] is clocked during the opcode, read[1] is the CTS byte
        Ok(read[2..].to_vec())
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, HalError> {
        let mut frame = vec![0u8; len + 1];
        frame[0] = READ_RX_FIFO;
        let read = self.transfer(&frame)?;
        Ok(read[1..].to_vec())
    }

    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        if bytes.len() > TX_FIFO_MAX {
            return Err(HalError::TooLong {
                len: bytes.len(),
                max: TX_FIFO_MAX,
            });
        }
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(WRITE_TX_FIFO);
        frame.extend_from_slice(bytes);
        self.spi
            .write(&frame)
            .map_err(|e| HalError::Spi(e.to_string()))?;
        Ok(())
    }

    fn read_fast_registers(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, HalError> {
        let opcode = *FRR_OPCODES
            .get(offset)
            .ok_or_else(|| HalError::InvalidConfig(format!("FRR offset {} out of range", offset)))?;
        if offset + len > FRR_OPCODES.len() {
            return Err(HalError::TooLong {
                len: offset + len,
                max: FRR_OPCODES.len(),
            });
        }
        let mut frame = vec![0u8; len + 1];
        frame[0] = opcode;
        let read = self.transfer(&frame)?;
        Ok(read[1..].to_vec())
    }

    fn power_enable(&mut self, on: bool) -> Result<(), HalError> {
        if on {
            self.sdn_pin.set_low();
        } else {
            self.sdn_pin.set_high();
        }
        log::debug!("SDN {}", if on { "released" } else { "asserted" });
        Ok(())
    }

    fn interrupt_enable(&mut self, on: bool) -> Result<(), HalError> {
        if !on {
            return self
                .nirq_pin
                .clear_async_interrupt()
                .map_err(|e| HalError::Gpio(e.to_string()));
        }
        let callback = self
            .on_interrupt
            .clone()
            .ok_or_else(|| HalError::InvalidConfig("no interrupt callback installed".to_string()))?;
        self.nirq_pin
            .set_async_interrupt(Trigger::FallingEdge, move |_level| callback())
            .map_err(|e| HalError::Gpio(e.to_string()))
    }

    fn cts(&mut self) -> Result<bool, HalError> {
        Ok(self.cts_pin.read() == Level::High)
    }
}

impl Drop for RaspberryPiTransport {
    fn drop(&mut self) {
        let _ = self.nirq_pin.clear_async_interrupt();
        self.sdn_pin.set_high();
        log::debug!("Raspberry Pi transport released, chip in shutdown");
    }
}
