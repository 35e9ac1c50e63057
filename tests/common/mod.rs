//! Common test utilities for jib integration tests
//!
//! This module provides reusable test helpers for:
//! - Float and duration assertions with explicit tolerances
//! - Building a rig on the mock bus

#![allow(dead_code)] // Not every test binary uses every helper

use std::time::Duration;

use jib::config::JibConfig;
use jib::hardware::mock::{MockBus, MockDelay, MockLine};
use jib::hardware::DutyCycle;
use jib::PanTiltRig;

/// Rig type used throughout the integration tests.
pub type MockRig = PanTiltRig<MockLine, MockDelay>;

/// Tolerance for pulse widths and angles computed in floating point.
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Assert that two floats agree within `tolerance`.
///
/// # Panics
/// Panics with `context` if they differ by more.
pub fn assert_close(actual: f64, expected: f64, tolerance: f64, context: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{context}: expected {expected} ±{tolerance}, got {actual}"
    );
}

/// Assert that a recorded hold is within a microsecond of `expected`.
///
/// Settle times go through `Duration::from_secs_f64`, which can round the last
/// nanosecond either way.
pub fn assert_duration_near(actual: Duration, expected: Duration, context: &str) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_micros(1),
        "{context}: expected {expected:?}, got {actual:?}"
    );
}

/// Duty cycle for a pulse on the default 50 Hz channel.
pub fn duty_at_50hz(pulse_ms: f64) -> DutyCycle {
    DutyCycle::from_pulse(pulse_ms, 50.0)
}

/// Build the stock rig on a fresh mock bus. The event log is cleared after the
/// construction-time centring.
pub fn mock_rig() -> (MockBus, MockRig) {
    mock_rig_with(&JibConfig::default())
}

pub fn mock_rig_with(config: &JibConfig) -> (MockBus, MockRig) {
    let mut bus = MockBus::new();
    let delay = bus.delay();
    let rig = PanTiltRig::from_config(&mut bus, config, delay).expect("mock rig");
    bus.clear_events();
    (bus, rig)
}
