//! Pulse channel: one PWM output line driven in short, bounded bursts.
//!
//! A hobby servo only needs its control pulse while it is travelling. Holding the
//! signal afterwards makes it buzz and heat up, and on a Pi it keeps a software PWM
//! thread busy. A channel therefore energises its line, blocks while the servo
//! settles, and de-energises again before returning.

use std::time::Duration;
use tracing::{debug, error};

use crate::error::{JibError, JibResult};
use crate::hardware::{cycle_ms, Delay, DutyCycle, LineId, PwmLine, ThreadDelay};

/// Default servo PWM frequency (20 ms cycle).
pub const DEFAULT_FREQUENCY_HZ: f64 = 50.0;

/// Exclusive owner of one PWM line.
///
/// The line is moved in at construction and never shared; every drive takes
/// `&mut self`, so two overlapping signals on one channel cannot be expressed.
#[derive(Debug)]
pub struct PulseChannel<L, D = ThreadDelay> {
    line: L,
    frequency_hz: f64,
    delay: D,
}

impl<L: PwmLine> PulseChannel<L, ThreadDelay> {
    /// Channel at the default 50 Hz that blocks the calling thread while holding.
    pub fn with_default_frequency(line: L) -> JibResult<Self> {
        Self::new(line, DEFAULT_FREQUENCY_HZ, ThreadDelay)
    }
}

impl<L: PwmLine, D: Delay> PulseChannel<L, D> {
    /// Create a channel on a claimed line.
    ///
    /// # Errors
    /// `Configuration` if `frequency_hz` is not a positive, finite number.
    pub fn new(line: L, frequency_hz: f64, delay: D) -> JibResult<Self> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(JibError::Configuration(format!(
                "PWM frequency must be positive, got {frequency_hz} Hz on line {}",
                line.id()
            )));
        }
        Ok(Self {
            line,
            frequency_hz,
            delay,
        })
    }

    /// Identifier of the owned line.
    pub fn line_id(&self) -> LineId {
        self.line.id()
    }

    /// PWM frequency in Hz.
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Length of one PWM cycle in milliseconds.
    pub fn cycle_ms(&self) -> f64 {
        cycle_ms(self.frequency_hz)
    }

    /// Duty cycle producing a `pulse_ms` wide pulse on this channel.
    pub fn duty_for_pulse(&self, pulse_ms: f64) -> DutyCycle {
        DutyCycle::from_pulse(pulse_ms, self.frequency_hz)
    }

    /// Energise the line at `duty`, block for `hold`, then de-energise.
    ///
    /// The line is stopped even if the hold unwinds.
    ///
    /// # Errors
    /// `HardwareFault` if the line cannot be started or stopped.
    pub fn drive(&mut self, duty: DutyCycle, hold: Duration) -> JibResult<()> {
        debug!(
            line = %self.line.id(),
            duty = duty.fraction(),
            hold_ms = hold.as_secs_f64() * 1000.0,
            "driving pulse channel"
        );
        let energized = Energized::start(&mut self.line, self.frequency_hz, duty)?;
        self.delay.delay(hold);
        energized.release()
    }

    /// Drive a `pulse_ms` wide pulse for `hold`.
    pub fn drive_pulse(&mut self, pulse_ms: f64, hold: Duration) -> JibResult<()> {
        let duty = self.duty_for_pulse(pulse_ms);
        self.drive(duty, hold)
    }

    /// Give the line back, e.g. to hand it to another channel.
    pub fn into_line(self) -> L {
        self.line
    }
}

/// Energised state of a line. Dropping it stops the signal.
struct Energized<'a, L: PwmLine> {
    line: &'a mut L,
    active: bool,
}

impl<'a, L: PwmLine> Energized<'a, L> {
    fn start(line: &'a mut L, frequency_hz: f64, duty: DutyCycle) -> JibResult<Self> {
        if let Err(e) = line.start(frequency_hz, duty) {
            // A failed start may still have left the output toggling.
            if let Err(stop_err) = line.stop() {
                debug!(line = %line.id(), %stop_err, "stop after failed start also failed");
            }
            return Err(e);
        }
        Ok(Self { line, active: true })
    }

    /// Stop the signal and report whether stopping worked.
    fn release(mut self) -> JibResult<()> {
        self.active = false;
        self.line.stop()
    }
}

impl<L: PwmLine> Drop for Energized<'_, L> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.line.stop() {
                error!(line = %self.line.id(), %e, "failed to de-energise line");
            }
        }
    }
}
