//! # Driver Configuration
//!
//! [`RadioConfig`] is loaded from JSON. Every field has a default, so an
//! empty object `{}` is a valid configuration for the simulated chip.
//!
//! ## Config-String Lists
//!
//! Radio register settings are shipped as lists of ready-made API commands
//! (usually `SET_PROPERTY`), each a Pascal string: one length byte followed
//! by that many command bytes. A zero length byte terminates the list.
//!
//! ```text
//! 08 11 00 04 00 52 00 18 00     SET_PROPERTY GLOBAL 0x00..0x03
//! 05 11 01 01 00 03              SET_PROPERTY INT_CTL 0x00
//! 00                             end of list
//! ```
//!
//! In the JSON file a list is a hex string (whitespace allowed). Two lists
//! are sent in order during configuration: the generic list exported by the
//! chip vendor's configuration tool, then the device-local overrides.

use crate::constants::{
    DEFAULT_CCA_THRESHOLD, DEFAULT_TRACE_DEPTH, DEFAULT_TX_POWER, DEFAULT_XO_FREQ, GPIO_CTS,
    GPIO_NIRQ, GPIO_SDN, MAX_RADIO_RSP, POWER_ON_WAIT_TIME, POWER_UP_WAIT_TIME, RX_WAIT_TIME,
    TX_WAIT_TIME,
};
use crate::error::ConfigError;
use crate::util::hex::decode_hex;
use nom::{
    bytes::complete::tag,
    combinator::verify,
    multi::{length_data, many_till},
    number::complete::u8 as parse_u8,
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// GPIO pin assignments (BCM numbering) for the chip's control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioPins {
    /// CTS (input), chip GPIO1 configured as CTS
    pub cts: u8,
    /// NIRQ (input) - interrupt request, active low
    pub nirq: u8,
    /// SDN (output) - shutdown, active high
    pub sdn: u8,
}

impl Default for GpioPins {
    fn default() -> Self {
        Self {
            cts: GPIO_CTS,
            nirq: GPIO_NIRQ,
            sdn: GPIO_SDN,
        }
    }
}

/// State-machine wait times, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub power_on_wait_ms: u64,
    pub power_up_wait_ms: u64,
    pub rx_wait_ms: u64,
    pub tx_wait_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            power_on_wait_ms: POWER_ON_WAIT_TIME.as_millis() as u64,
            power_up_wait_ms: POWER_UP_WAIT_TIME.as_millis() as u64,
            rx_wait_ms: RX_WAIT_TIME.as_millis() as u64,
            tx_wait_ms: TX_WAIT_TIME.as_millis() as u64,
        }
    }
}

impl TimingConfig {
    pub fn power_on_wait(&self) -> Duration {
        Duration::from_millis(self.power_on_wait_ms)
    }

    pub fn power_up_wait(&self) -> Duration {
        Duration::from_millis(self.power_up_wait_ms)
    }

    pub fn rx_wait(&self) -> Duration {
        Duration::from_millis(self.rx_wait_ms)
    }

    pub fn tx_wait(&self) -> Duration {
        Duration::from_millis(self.tx_wait_ms)
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// SPI bus number (0 or 1)
    pub spi_bus: u8,
    pub pins: GpioPins,
    /// Channel used for START_RX / START_TX
    pub channel: u8,
    /// Crystal frequency passed with POWER_UP
    pub xo_freq: u32,
    pub timing: TimingConfig,
    /// Latched RSSI below which the channel counts as clear
    pub cca_threshold: u8,
    /// Records kept by the trace ring
    pub trace_depth: usize,
    /// Dispatch TurnOn as soon as the service starts
    pub start_on_boot: bool,
    /// Power used when a send request does not give one
    pub tx_power: u8,
    /// Generic config-string list, hex
    pub wds_config: String,
    /// Device-local config-string list, hex
    pub local_config: String,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            pins: GpioPins::default(),
            channel: 0,
            xo_freq: DEFAULT_XO_FREQ,
            timing: TimingConfig::default(),
            cca_threshold: DEFAULT_CCA_THRESHOLD,
            trace_depth: DEFAULT_TRACE_DEPTH,
            start_on_boot: false,
            tx_power: DEFAULT_TX_POWER,
            wds_config: String::new(),
            local_config: String::new(),
        }
    }
}

impl RadioConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RadioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spi_bus > 1 {
            return Err(ConfigError::Invalid(format!(
                "spi_bus {} out of range (0 or 1)",
                self.spi_bus
            )));
        }
        if self.trace_depth == 0 {
            return Err(ConfigError::Invalid("trace_depth must be non-zero".to_string()));
        }
        let t = &self.timing;
        if [t.power_on_wait_ms, t.power_up_wait_ms, t.rx_wait_ms, t.tx_wait_ms].contains(&0) {
            return Err(ConfigError::Invalid("wait times must be non-zero".to_string()));
        }
        self.config_lists()?;
        Ok(())
    }

    /// The two config-string lists, generic first
    pub fn config_lists(&self) -> Result<[ConfigList; 2], ConfigError> {
        Ok([
            ConfigList::from_hex("wds", &self.wds_config)?,
            ConfigList::from_hex("local", &self.local_config)?,
        ])
    }
}

/// A parsed config-string list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigList {
    name: &'static str,
    strings: Vec<Vec<u8>>,
}

impl ConfigList {
    pub fn empty(name: &'static str) -> Self {
        Self {
            name,
            strings: Vec::new(),
        }
    }

    /// Parse a hex-encoded list. An empty string yields an empty list.
    pub fn from_hex(name: &'static str, hex: &str) -> Result<Self, ConfigError> {
        let raw = decode_hex(hex).map_err(|e| ConfigError::InvalidHex {
            list: name,
            reason: e.to_string(),
        })?;
        if raw.is_empty() {
            return Ok(Self::empty(name));
        }
        Self::from_bytes(name, &raw)
    }

    /// Parse a terminated sequence of Pascal strings
    pub fn from_bytes(name: &'static str, raw: &[u8]) -> Result<Self, ConfigError> {
        let malformed = |offset: usize, reason: &str| ConfigError::MalformedList {
            list: name,
            offset,
            reason: reason.to_string(),
        };

        let (rest, strings) = match config_strings(raw) {
            Ok(parsed) => parsed,
            Err(nom::Err::Incomplete(_)) => {
                return Err(malformed(raw.len(), "string runs past end of list"))
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let offset = raw.len() - e.input.len();
                let reason = if e.input.is_empty() {
                    "missing zero-length terminator"
                } else {
                    "string runs past end of list"
                };
                return Err(malformed(offset, reason));
            }
        };

        if !rest.is_empty() {
            log::warn!(
                "{} config list: {} bytes after terminator ignored",
                name,
                rest.len()
            );
        }

        let mut offset = 0;
        for s in &strings {
            if s.len() > MAX_RADIO_RSP {
                return Err(malformed(
                    offset,
                    &format!("string of {} bytes exceeds {}", s.len(), MAX_RADIO_RSP),
                ));
            }
            offset += s.len() + 1;
        }

        Ok(Self {
            name,
            strings: strings.into_iter().map(<[u8]>::to_vec).collect(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.strings.iter().map(Vec::as_slice)
    }
}

fn config_string(input: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(length_data(parse_u8), |s: &[u8]| !s.is_empty())(input)
}

fn config_strings(input: &[u8]) -> IResult<&[u8], Vec<&[u8]>> {
    let (rest, (strings, _)) = many_till(config_string, tag(&[0u8][..]))(input)?;
    Ok((rest, strings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let list = ConfigList::from_hex("wds", "05 11 01 01 00 03  02 34 01  00").unwrap();
        assert_eq!(list.len(), 2);
        let strings: Vec<&[u8]> = list.iter().collect();
        assert_eq!(strings[0], &[0x11, 0x01, 0x01, 0x00, 0x03]);
        assert_eq!(strings[1], &[0x34, 0x01]);
    }

    #[test]
    fn test_empty_hex_is_empty_list() {
        assert!(ConfigList::from_hex("local", "").unwrap().is_empty());
        assert!(ConfigList::from_hex("local", "00").unwrap().is_empty());
    }

    #[test]
    fn test_missing_terminator() {
        let err = ConfigList::from_hex("wds", "02 34 01").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedList { offset: 3, .. }));
    }

    #[test]
    fn test_truncated_string() {
        let err = ConfigList::from_hex("wds", "05 11 01").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedList { .. }));
    }

    #[test]
    fn test_oversized_string_rejected() {
        let mut raw = vec![17u8];
        raw.extend([0x11; 17]);
        raw.push(0);
        let err = ConfigList::from_bytes("wds", &raw).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedList { offset: 0, .. }));
    }

    #[test]
    fn test_defaults_validate() {
        let config = RadioConfig::from_json("{}").unwrap();
        assert_eq!(config, RadioConfig::default());
        assert_eq!(config.timing.power_on_wait(), Duration::from_millis(10));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(RadioConfig::from_json(r#"{"trace_depth": 0}"#).is_err());
        assert!(RadioConfig::from_json(r#"{"timing": {"rx_wait_ms": 0}}"#).is_err());
        assert!(matches!(
            RadioConfig::from_json(r#"{"wds_config": "zz"}"#),
            Err(ConfigError::InvalidHex { list: "wds", .. })
        ));
    }
}
