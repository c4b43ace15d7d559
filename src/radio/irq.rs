//! # Si446x Interrupt Flags
//!
//! The Si446x groups its interrupt sources into three 8-bit pending
//! registers: packet handler (PH), modem and chip. GET_INT_STATUS returns
//! all three (plus the live status bits) and, in the same command, clears
//! whichever pending bits the caller asks for.
//!
//! ## Bit Assignments
//!
//! ```text
//! PH_PEND    bit 7 FILTER_MATCH   bit 6 FILTER_MISS   bit 5 PACKET_SENT
//!            bit 4 PACKET_RX      bit 3 CRC_ERROR     bit 1 TX_FIFO_ALMOST_EMPTY
//!            bit 0 RX_FIFO_ALMOST_FULL
//! MODEM_PEND bit 6 POSTAMBLE      bit 5 INVALID_SYNC  bit 4 RSSI_JUMP
//!            bit 3 RSSI           bit 2 INVALID_PREAMBLE
//!            bit 1 PREAMBLE_DETECT bit 0 SYNC_DETECT
//! CHIP_PEND  bit 6 CAL            bit 5 FIFO_UNDERFLOW_OVERFLOW
//!            bit 4 STATE_CHANGE   bit 3 CMD_ERROR     bit 2 CHIP_READY
//!            bit 1 LOW_BATT       bit 0 WUT
//! ```
//!
//! ## Clear Convention
//!
//! The clear bytes sent with GET_INT_STATUS use inverted logic: a `0` bit
//! clears the pending flag, a `1` leaves it alone. [`ClearMask`] hides that.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Packet handler pending flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PhPend: u8 {
        const FILTER_MATCH = 1 << 7;
        const FILTER_MISS = 1 << 6;
        const PACKET_SENT = 1 << 5;
        const PACKET_RX = 1 << 4;
        const CRC_ERROR = 1 << 3;
        const TX_FIFO_ALMOST_EMPTY = 1 << 1;
        const RX_FIFO_ALMOST_FULL = 1 << 0;
    }
}

bitflags! {
    /// Modem pending flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ModemPend: u8 {
        const POSTAMBLE_DETECT = 1 << 6;
        const INVALID_SYNC = 1 << 5;
        const RSSI_JUMP = 1 << 4;
        const RSSI = 1 << 3;
        const INVALID_PREAMBLE = 1 << 2;
        const PREAMBLE_DETECT = 1 << 1;
        const SYNC_DETECT = 1 << 0;
    }
}

bitflags! {
    /// Chip pending flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ChipPend: u8 {
        const CAL = 1 << 6;
        const FIFO_UNDERFLOW_OVERFLOW = 1 << 5;
        const STATE_CHANGE = 1 << 4;
        const CMD_ERROR = 1 << 3;
        const CHIP_READY = 1 << 2;
        const LOW_BATT = 1 << 1;
        const WUT = 1 << 0;
    }
}

/// Snapshot of the pending groups the driver acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PendingFlags {
    pub modem_pend: ModemPend,
    pub ph_pend: PhPend,
}

impl PendingFlags {
    pub fn new(modem_pend: ModemPend, ph_pend: PhPend) -> Self {
        Self {
            modem_pend,
            ph_pend,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modem_pend.is_empty() && self.ph_pend.is_empty()
    }
}

impl fmt::Display for PendingFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "modem_pend=0x{:02x} ph_pend=0x{:02x}",
            self.modem_pend.bits(),
            self.ph_pend.bits()
        )
    }
}

/// Decoded GET_INT_STATUS response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntStatus {
    pub int_pend: u8,
    pub int_status: u8,
    pub ph_pend: PhPend,
    pub ph_status: u8,
    pub modem_pend: ModemPend,
    pub modem_status: u8,
    pub chip_pend: ChipPend,
    pub chip_status: u8,
}

impl IntStatus {
    /// Response length of GET_INT_STATUS (CTS byte excluded)
    pub const LEN: usize = 8;

    /// Decode a response; short responses decode as "nothing pending".
    pub fn from_bytes(raw: &[u8]) -> Self {
        if raw.len() < Self::LEN {
            return Self::default();
        }
        Self {
            int_pend: raw[0],
            int_status: raw[1],
            ph_pend: PhPend::from_bits_truncate(raw[2]),
            ph_status: raw[3],
            modem_pend: ModemPend::from_bits_truncate(raw[4]),
            modem_status: raw[5],
            chip_pend: ChipPend::from_bits_truncate(raw[6]),
            chip_status: raw[7],
        }
    }

    pub fn pending(&self) -> PendingFlags {
        PendingFlags::new(self.modem_pend, self.ph_pend)
    }
}

/// Pending flags to clear with the next GET_INT_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClearMask {
    pub ph: PhPend,
    pub modem: ModemPend,
    pub chip: ChipPend,
}

impl ClearMask {
    /// Clear exactly the flags in `flags`
    pub fn of(flags: PendingFlags) -> Self {
        Self {
            ph: flags.ph_pend,
            modem: flags.modem_pend,
            chip: ChipPend::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ph.is_empty() && self.modem.is_empty() && self.chip.is_empty()
    }

    /// Wire form: one byte per group, zero bits clear
    pub fn to_wire(self) -> [u8; 3] {
        [!self.ph.bits(), !self.modem.bits(), !self.chip.bits()]
    }
}

/// The four fast response registers as configured by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FastRegisters {
    /// FRR A: current chip state
    pub chip_state: u8,
    /// FRR B: packet handler pending
    pub ph_pend: PhPend,
    /// FRR C: modem pending
    pub modem_pend: ModemPend,
    /// FRR D: latched RSSI
    pub latched_rssi: u8,
}

impl FastRegisters {
    pub fn from_bytes(raw: &[u8]) -> Self {
        let byte = |i: usize| raw.get(i).copied().unwrap_or(0);
        Self {
            chip_state: byte(0),
            ph_pend: PhPend::from_bits_truncate(byte(1)),
            modem_pend: ModemPend::from_bits_truncate(byte(2)),
            latched_rssi: byte(3),
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [
            self.chip_state,
            self.ph_pend.bits(),
            self.modem_pend.bits(),
            self.latched_rssi,
        ]
    }
}

impl fmt::Display for FastRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::util::hex::encode_hex(&self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_mask_inverts() {
        let flags = PendingFlags::new(ModemPend::SYNC_DETECT, PhPend::PACKET_RX);
        let wire = ClearMask::of(flags).to_wire();
        assert_eq!(wire, [!0x10, !0x01, 0xff]);
        assert_eq!(ClearMask::default().to_wire(), [0xff, 0xff, 0xff]);
    }

    #[test]
    fn test_int_status_decode() {
        let raw = [0x03, 0x03, 0x30, 0x00, 0x21, 0x00, 0x00, 0x00];
        let status = IntStatus::from_bytes(&raw);
        assert!(status.ph_pend.contains(PhPend::PACKET_SENT | PhPend::PACKET_RX));
        assert!(status.modem_pend.contains(ModemPend::INVALID_SYNC | ModemPend::SYNC_DETECT));
        assert!(IntStatus::from_bytes(&raw[..3]).pending().is_empty());
    }

    #[test]
    fn test_fast_registers_short_read() {
        let frr = FastRegisters::from_bytes(&[0x08, 0x10]);
        assert_eq!(frr.chip_state, 0x08);
        assert_eq!(frr.ph_pend, PhPend::PACKET_RX);
        assert_eq!(frr.latched_rssi, 0);
        assert_eq!(frr.to_string(), "08100000");
    }
}
