//! Unit tests for the logging functionality in the `si446x-rs` crate.

use si446x_rs::logging::{log_debug, log_error, log_info, log_warn, try_init_logger};
use si446x_rs::util::logging::{LogThrottle, ThrottleManager};

/// Tests that the logging helpers work once a logger is installed.
#[test]
fn test_logging() {
    try_init_logger();
    log_error("This is an error message");
    log_warn("This is a warning message");
    log_info("This is an info message");
    log_debug("This is a debug message");
}

/// Tests that initializing twice does not panic.
#[test]
fn test_try_init_logger_twice() {
    try_init_logger();
    try_init_logger();
}

/// Tests that a throttle stops at its cap and counts what it dropped.
#[test]
fn test_throttle_cap() {
    let mut throttle = LogThrottle::new(60_000, 3);
    let allowed = (0..10).filter(|_| throttle.allow()).count();
    assert_eq!(allowed, 3);
    assert_eq!(throttle.take_suppressed(), 7);
    assert_eq!(throttle.take_suppressed(), 0);
}

#[test]
fn test_throttle_manager_categories() {
    let mut manager = ThrottleManager::new();
    assert!(manager.allow("phantom", 60_000, 1));
    assert!(!manager.allow("phantom", 60_000, 1));
    // a flood of one category leaves the others alone
    assert!(manager.allow("cts", 60_000, 1));
}
