//! # Logging Utilities
//!
//! Rate limiting and hex dump helpers for the radio driver.
//!
//! A radio that sits in a noisy band can produce phantom interrupts or CTS
//! misses many times a second. Those conditions are worth one line in the
//! log, not thousands, so the chip layer and the interrupt dispatcher route
//! them through a [`LogThrottle`] or a [`ThrottleManager`] category.
//!
//! ## Usage
//!
//! ```rust
//! use si446x_rs::util::logging::{LogThrottle, log_fifo_hex};
//!
//! let mut throttle = LogThrottle::new(1000, 5); // 5 messages per second
//! if throttle.allow() {
//!     log::warn!("CTS not observed");
//! }
//!
//! log_fifo_hex("rx fifo", &[0x05, 0x01, 0x02]);
//! ```

use std::collections::HashMap;
use std::time::Instant;

/// Throttling structure for rate-limiting log messages
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Messages suppressed since the last allowed one
    suppressed: u64,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count += 1;
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed += 1;
        }
        allowed
    }

    /// Number of messages suppressed since the last call, resetting the tally
    pub fn take_suppressed(&mut self) -> u64 {
        std::mem::take(&mut self.suppressed)
    }
}

/// Per-category throttles
///
/// Different anomaly classes get their own budget so that a flood of one
/// does not hide the others.
#[derive(Debug, Default)]
pub struct ThrottleManager {
    throttles: HashMap<&'static str, LogThrottle>,
}

impl ThrottleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if logging is allowed for a specific category
    pub fn allow(&mut self, category: &'static str, window_ms: u64, cap: u32) -> bool {
        self.throttles
            .entry(category)
            .or_insert_with(|| LogThrottle::new(window_ms, cap))
            .allow()
    }
}

/// Log FIFO or command bytes in hex at debug level, truncated
pub fn log_fifo_hex(prefix: &str, data: &[u8]) {
    const MAX_LOG_BYTES: usize = 64;

    if !log::log_enabled!(log::Level::Debug) {
        return;
    }

    let display_data = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::format_hex_compact(display_data);
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::debug!("{prefix}: {hex_str}{suffix}");
}
