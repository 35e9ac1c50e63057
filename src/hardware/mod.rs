//! Hardware access layer for PWM output lines.
//!
//! The servos only need three things from the GPIO subsystem: claim a line for PWM
//! output, set a duty cycle on it, and stop it again. Those are the two capability
//! traits in this module; any backend that provides them can drive the jib.
//!
//! # Available backends
//!
//! - [`mock::MockBus`] - in-memory lines that record every energise/stop, for tests
//!   and for running the CLI off-target
//! - `rpi::RppalBus` - Raspberry Pi GPIO through `rppal` software PWM (feature `rpi`)
//!
//! Pin numbering is chosen once, when the bus is constructed, instead of being read
//! from process-wide GPIO mode state.

use crate::error::JibResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod mock;
#[cfg(feature = "rpi")]
pub mod rpi;

/// Logical identifier of a PWM-capable output line.
///
/// How the number maps to a physical pin depends on the bus's [`PinNumbering`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(pub u8);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pin numbering scheme used to interpret a [`LineId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// Physical pin position on the 40-pin header.
    #[default]
    Board,
    /// Broadcom SoC GPIO number.
    Bcm,
}

impl PinNumbering {
    /// Translate `line` to a BCM GPIO number.
    ///
    /// Returns `None` for header positions that are power, ground or ID EEPROM pins.
    pub fn to_bcm(self, line: LineId) -> Option<u8> {
        match self {
            Self::Bcm => Some(line.0),
            Self::Board => board_to_bcm(line.0),
        }
    }
}

fn board_to_bcm(pin: u8) -> Option<u8> {
    let bcm = match pin {
        3 => 2,
        5 => 3,
        7 => 4,
        8 => 14,
        10 => 15,
        11 => 17,
        12 => 18,
        13 => 27,
        15 => 22,
        16 => 23,
        18 => 24,
        19 => 10,
        21 => 9,
        22 => 25,
        23 => 11,
        24 => 8,
        26 => 7,
        29 => 5,
        31 => 6,
        32 => 12,
        33 => 13,
        35 => 19,
        36 => 16,
        37 => 26,
        38 => 20,
        40 => 21,
        _ => return None,
    };
    Some(bcm)
}

/// Fraction of each PWM period the line is held high, in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct DutyCycle(f64);

impl DutyCycle {
    /// Duty cycle from a fraction, clamped to `[0, 1]`.
    pub fn new(fraction: f64) -> Self {
        if fraction.is_nan() {
            return Self(0.0);
        }
        Self(fraction.clamp(0.0, 1.0))
    }

    /// Duty cycle that produces a `pulse_ms` wide pulse at `frequency_hz`.
    ///
    /// The cycle length is `1000 / frequency_hz` milliseconds, so at 50 Hz a 1.5 ms
    /// pulse is a 7.5 % duty cycle.
    pub fn from_pulse(pulse_ms: f64, frequency_hz: f64) -> Self {
        Self::new(pulse_ms / cycle_ms(frequency_hz))
    }

    /// Duty cycle as a fraction in `[0, 1]`.
    pub fn fraction(self) -> f64 {
        self.0
    }

    /// Duty cycle in percent, for backends that take `0..=100`.
    pub fn percent(self) -> f64 {
        self.0 * 100.0
    }
}

/// Length of one PWM cycle in milliseconds.
pub fn cycle_ms(frequency_hz: f64) -> f64 {
    1000.0 / frequency_hz
}

/// A claimed output line that can be driven with a PWM signal.
///
/// A line is owned by exactly one channel; backends hand out each line at most once.
pub trait PwmLine {
    /// Identifier the line was claimed with.
    fn id(&self) -> LineId;

    /// Start (or retune) the PWM signal.
    fn start(&mut self, frequency_hz: f64, duty: DutyCycle) -> JibResult<()>;

    /// Stop the PWM signal and leave the line low.
    fn stop(&mut self) -> JibResult<()>;
}

impl<L: PwmLine + ?Sized> PwmLine for Box<L> {
    fn id(&self) -> LineId {
        (**self).id()
    }

    fn start(&mut self, frequency_hz: f64, duty: DutyCycle) -> JibResult<()> {
        (**self).start(frequency_hz, duty)
    }

    fn stop(&mut self) -> JibResult<()> {
        (**self).stop()
    }
}

/// Hardware access layer that hands out PWM lines.
pub trait PwmBus {
    /// Line type produced by this bus.
    type Line: PwmLine;

    /// Claim `line` for exclusive PWM output.
    ///
    /// # Errors
    /// `LineBusy` if the line is already held, `HardwareFault` if the device is
    /// unavailable or the line does not exist.
    fn claim(&mut self, line: LineId) -> JibResult<Self::Line>;
}

/// Blocking delay used to hold a PWM signal while a servo settles.
pub trait Delay {
    /// Block the calling thread for `duration`.
    fn delay(&mut self, duration: Duration);
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}

/// [`Delay`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
