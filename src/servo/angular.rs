//! Angular servo: a pulse channel with a calibrated ±90° range.
//!
//! Every hobby servo maps pulse width to angle a little differently, so each unit
//! carries its own calibration: the pulse widths that put the horn at its physical
//! -90° (left) and +90° (right) stops. Angles in between are linear in pulse width.
//!
//! There is no position feedback. The servo remembers the last pulse it was sent
//! and uses the distance to the next one to estimate how long to keep the signal on.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ServoConfig;
use crate::error::{JibError, JibResult};
use crate::hardware::{Delay, LineId, PwmBus, PwmLine, ThreadDelay};
use crate::servo::channel::PulseChannel;

/// Lowest commandable angle in degrees.
pub const MIN_ANGLE_DEG: f64 = -90.0;
/// Highest commandable angle in degrees.
pub const MAX_ANGLE_DEG: f64 = 90.0;
/// Shortest hold for any move, however small.
pub const SETTLE_FLOOR: Duration = Duration::from_millis(50);
/// Hold for a full-range move, and for the first move of a servo.
pub const DEFAULT_MAX_SETTLE: Duration = Duration::from_millis(500);
/// Extra hold appended to every move.
pub const DEFAULT_STUB_DELAY: Duration = Duration::from_millis(100);

/// Clamp `degrees` to `[-90, 90]`. NaN maps to the centre.
pub fn clamp_angle(degrees: f64) -> f64 {
    if degrees.is_nan() {
        return 0.0;
    }
    degrees.clamp(MIN_ANGLE_DEG, MAX_ANGLE_DEG)
}

/// Pulse widths of a servo's physical endpoints, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    left_pulse_ms: f64,
    right_pulse_ms: f64,
}

impl Calibration {
    /// Create a calibration.
    ///
    /// # Errors
    /// `Configuration` unless `0 < left_pulse_ms < right_pulse_ms` (both finite).
    pub fn new(left_pulse_ms: f64, right_pulse_ms: f64) -> JibResult<Self> {
        if !left_pulse_ms.is_finite() || !right_pulse_ms.is_finite() {
            return Err(JibError::Configuration(format!(
                "calibration pulses must be finite, got {left_pulse_ms}/{right_pulse_ms} ms"
            )));
        }
        if left_pulse_ms <= 0.0 || right_pulse_ms <= left_pulse_ms {
            return Err(JibError::Configuration(format!(
                "calibration requires 0 < left < right, got left={left_pulse_ms} ms right={right_pulse_ms} ms"
            )));
        }
        Ok(Self {
            left_pulse_ms,
            right_pulse_ms,
        })
    }

    /// Pulse width at -90°.
    pub fn left_pulse_ms(&self) -> f64 {
        self.left_pulse_ms
    }

    /// Pulse width at +90°.
    pub fn right_pulse_ms(&self) -> f64 {
        self.right_pulse_ms
    }

    /// Pulse width at 0°, halfway between the endpoints.
    pub fn center_pulse_ms(&self) -> f64 {
        self.left_pulse_ms + (self.right_pulse_ms - self.left_pulse_ms) / 2.0
    }

    /// Width of the calibrated range.
    pub fn span_ms(&self) -> f64 {
        self.right_pulse_ms - self.left_pulse_ms
    }

    /// Pulse width for `degrees`, after clamping to `[-90, 90]`.
    pub fn pulse_for_angle(&self, degrees: f64) -> f64 {
        let degrees = clamp_angle(degrees);
        if degrees == MIN_ANGLE_DEG {
            return self.left_pulse_ms;
        }
        if degrees == MAX_ANGLE_DEG {
            return self.right_pulse_ms;
        }
        let ratio = (degrees - MIN_ANGLE_DEG) / (MAX_ANGLE_DEG - MIN_ANGLE_DEG);
        self.span_ms() * ratio + self.left_pulse_ms
    }

    /// Clamp a pulse width into the calibrated range.
    pub fn clamp_pulse(&self, pulse_ms: f64) -> f64 {
        if pulse_ms.is_nan() {
            return self.center_pulse_ms();
        }
        pulse_ms.clamp(self.left_pulse_ms, self.right_pulse_ms)
    }
}

/// Hold timing of a servo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoTiming {
    /// Pad added to every settle estimate.
    pub stub_delay: Duration,
    /// Settle time for a full-range move.
    pub max_settle: Duration,
}

impl Default for ServoTiming {
    fn default() -> Self {
        Self {
            stub_delay: DEFAULT_STUB_DELAY,
            max_settle: DEFAULT_MAX_SETTLE,
        }
    }
}

/// Servo positioned by angle.
///
/// # Example
///
/// ```rust
/// use jib::hardware::mock::MockBus;
/// use jib::hardware::{LineId, PwmBus};
/// use jib::servo::{AngularServo, Calibration, PulseChannel, ServoTiming};
///
/// let mut bus = MockBus::new();
/// let line = bus.claim(LineId(8)).unwrap();
/// let channel = PulseChannel::new(line, 50.0, bus.delay()).unwrap();
/// let calibration = Calibration::new(0.550, 1.805).unwrap();
/// let mut servo = AngularServo::new(channel, calibration, ServoTiming::default()).unwrap();
///
/// assert_eq!(servo.angle(120.0).unwrap(), 90.0);
/// assert_eq!(servo.last_position_ms(), Some(1.805));
/// ```
#[derive(Debug)]
pub struct AngularServo<L, D = ThreadDelay> {
    channel: PulseChannel<L, D>,
    calibration: Calibration,
    timing: ServoTiming,
    last_position_ms: Option<f64>,
}

impl<L: PwmLine, D: Delay> AngularServo<L, D> {
    /// Wrap a channel with a calibration.
    ///
    /// # Errors
    /// `Configuration` if the right endpoint does not fit in one PWM cycle.
    pub fn new(
        channel: PulseChannel<L, D>,
        calibration: Calibration,
        timing: ServoTiming,
    ) -> JibResult<Self> {
        if calibration.right_pulse_ms() >= channel.cycle_ms() {
            return Err(JibError::Configuration(format!(
                "right pulse {} ms does not fit in a {} ms cycle on line {}",
                calibration.right_pulse_ms(),
                channel.cycle_ms(),
                channel.line_id()
            )));
        }
        Ok(Self {
            channel,
            calibration,
            timing,
            last_position_ms: None,
        })
    }

    /// Claim the configured line from `bus` and build the servo.
    pub fn from_config<B>(bus: &mut B, config: &ServoConfig, delay: D) -> JibResult<Self>
    where
        B: PwmBus<Line = L>,
    {
        let line = bus.claim(config.line)?;
        let channel = PulseChannel::new(line, config.frequency_hz, delay)?;
        Self::new(channel, config.calibration()?, config.timing())
    }

    /// Estimated time for the horn to travel from the last position to `target_ms`.
    pub fn settle_time(&self, target_ms: f64) -> Duration {
        self.settle_time_with(target_ms, self.timing.max_settle)
    }

    /// [`settle_time`](Self::settle_time) with an explicit full-range time.
    ///
    /// A servo that has never moved gets `max_time`, since its horn could be anywhere.
    /// Otherwise the time is proportional to the fraction of the calibrated range
    /// being travelled, but never below [`SETTLE_FLOOR`].
    pub fn settle_time_with(&self, target_ms: f64, max_time: Duration) -> Duration {
        let Some(last) = self.last_position_ms else {
            return max_time;
        };
        // Targets beyond the calibrated range cannot travel further than the full range.
        let fraction = ((last - target_ms).abs() / self.calibration.span_ms()).min(1.0);
        let secs = (fraction * max_time.as_secs_f64()).max(SETTLE_FLOOR.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Send a `position_ms` pulse and hold it until the servo has settled.
    ///
    /// Pulses outside the calibrated range are clamped to it.
    ///
    /// # Errors
    /// `HardwareFault` from the channel. The remembered position is then unchanged.
    pub fn move_to(&mut self, position_ms: f64) -> JibResult<()> {
        let position = self.calibration.clamp_pulse(position_ms);
        if position != position_ms {
            warn!(
                line = %self.channel.line_id(),
                requested_ms = position_ms,
                applied_ms = position,
                "pulse width clamped to calibrated range"
            );
        }

        let hold = self.settle_time(position) + self.timing.stub_delay;
        let duty = self.channel.duty_for_pulse(position);
        self.channel.drive(duty, hold)?;

        self.last_position_ms = Some(position);
        debug!(line = %self.channel.line_id(), position_ms = position, "servo moved");
        Ok(())
    }

    /// Move to `degrees` and return the angle actually applied.
    ///
    /// Out-of-range input is clamped to `[-90, 90]` rather than rejected.
    pub fn angle(&mut self, degrees: f64) -> JibResult<f64> {
        let applied = clamp_angle(degrees);
        if applied != degrees {
            warn!(
                line = %self.channel.line_id(),
                requested = degrees,
                applied,
                "angle clamped"
            );
        }
        self.move_to(self.calibration.pulse_for_angle(applied))?;
        Ok(applied)
    }

    /// Move to the -90° endpoint.
    pub fn left(&mut self) -> JibResult<()> {
        self.move_to(self.calibration.left_pulse_ms())
    }

    /// Move to 0°.
    pub fn center(&mut self) -> JibResult<()> {
        self.move_to(self.calibration.center_pulse_ms())
    }

    /// Move to the +90° endpoint.
    pub fn right(&mut self) -> JibResult<()> {
        self.move_to(self.calibration.right_pulse_ms())
    }

    /// Calibrated endpoints.
    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    /// Hold timing parameters.
    pub fn timing(&self) -> ServoTiming {
        self.timing
    }

    /// Last pulse sent successfully, `None` until the first move.
    pub fn last_position_ms(&self) -> Option<f64> {
        self.last_position_ms
    }

    /// Line driving this servo.
    pub fn line_id(&self) -> LineId {
        self.channel.line_id()
    }

    /// Underlying pulse channel.
    pub fn channel(&self) -> &PulseChannel<L, D> {
        &self.channel
    }

    /// Release the channel for teardown.
    pub fn into_channel(self) -> PulseChannel<L, D> {
        self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockBus, MockDelay, MockLine};
    use tracing_test::traced_test;

    fn servo(bus: &mut MockBus, left: f64, right: f64) -> AngularServo<MockLine, MockDelay> {
        let line = bus.claim(LineId(8)).unwrap();
        let channel = PulseChannel::new(line, 50.0, bus.delay()).unwrap();
        AngularServo::new(
            channel,
            Calibration::new(left, right).unwrap(),
            ServoTiming::default(),
        )
        .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_calibration_endpoints_exact() {
        let cal = Calibration::new(0.550, 1.805).unwrap();
        assert_eq!(cal.pulse_for_angle(-90.0), 0.550);
        assert_eq!(cal.pulse_for_angle(90.0), 1.805);
        assert!(close(cal.pulse_for_angle(0.0), 1.1775));
        assert!(close(cal.center_pulse_ms(), (0.550 + 1.805) / 2.0));
    }

    #[test]
    fn test_calibration_rejects_inverted_range() {
        assert!(Calibration::new(1.8, 0.5).is_err());
        assert!(Calibration::new(0.0, 1.5).is_err());
        assert!(Calibration::new(f64::NAN, 1.5).is_err());
    }

    #[test]
    fn test_clamp_angle() {
        assert_eq!(clamp_angle(135.0), 90.0);
        assert_eq!(clamp_angle(-400.0), -90.0);
        assert_eq!(clamp_angle(12.5), 12.5);
        assert_eq!(clamp_angle(f64::NAN), 0.0);
        assert_eq!(clamp_angle(f64::INFINITY), 90.0);
    }

    #[test]
    fn test_applied_angle_is_clamped_request() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);

        for d in [-1e9, -180.0, -90.5, -90.0, -33.3, 0.0, 45.0, 90.0, 90.01, 720.0] {
            let applied = s.angle(d).unwrap();
            assert_eq!(applied, clamp_angle(d));
            assert!((MIN_ANGLE_DEG..=MAX_ANGLE_DEG).contains(&applied));
        }
    }

    #[test]
    fn test_settle_time_monotonic_in_distance() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);
        s.move_to(0.550).unwrap();

        let mut previous = Duration::ZERO;
        for step in 0..=100 {
            let target = 0.550 + 1.255 * f64::from(step) / 100.0;
            let t = s.settle_time(target);
            assert!(t >= previous, "settle time dropped at {target}");
            assert!(t >= SETTLE_FLOOR);
            previous = t;
        }
    }

    #[test]
    fn test_settle_time_saturates_for_huge_targets() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);
        s.move_to(0.550).unwrap();

        assert_eq!(s.settle_time(f64::INFINITY), DEFAULT_MAX_SETTLE);
        assert_eq!(s.settle_time(1e300), DEFAULT_MAX_SETTLE);
        assert_eq!(s.settle_time(f64::NEG_INFINITY), DEFAULT_MAX_SETTLE);
        assert_eq!(s.settle_time(f64::NAN), DEFAULT_MAX_SETTLE);
    }

    #[test]
    fn test_first_move_uses_max_settle() {
        let mut bus = MockBus::new();
        let s = servo(&mut bus, 0.550, 1.805);

        assert_eq!(s.settle_time(0.550), DEFAULT_MAX_SETTLE);
        assert_eq!(s.settle_time(1.805), DEFAULT_MAX_SETTLE);
        assert_eq!(
            s.settle_time_with(1.0, Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_settle_time_proportional_and_floored() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.5, 1.5);
        s.move_to(0.5).unwrap();

        // full range
        assert!(close(s.settle_time(1.5).as_secs_f64(), 0.5));
        // half range
        assert!(close(s.settle_time(1.0).as_secs_f64(), 0.25));
        // tiny move is floored
        assert_eq!(s.settle_time(0.51), SETTLE_FLOOR);
        assert_eq!(s.settle_time(0.5), SETTLE_FLOOR);
    }

    #[test]
    fn test_move_holds_settle_plus_stub() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.5, 1.5);

        s.move_to(1.0).unwrap();
        s.move_to(1.5).unwrap();

        assert_eq!(
            bus.holds(),
            vec![
                DEFAULT_MAX_SETTLE + DEFAULT_STUB_DELAY,
                Duration::from_secs_f64(0.25) + DEFAULT_STUB_DELAY,
            ]
        );
    }

    #[test]
    fn test_angle_returns_clamped_and_records_position() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);
        assert_eq!(s.last_position_ms(), None);

        assert_eq!(s.angle(-120.0).unwrap(), -90.0);
        assert_eq!(s.last_position_ms(), Some(0.550));

        assert_eq!(s.angle(0.0).unwrap(), 0.0);
        assert!(close(s.last_position_ms().unwrap(), 1.1775));
    }

    #[test]
    #[traced_test]
    fn test_clamped_angle_is_logged() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);

        s.angle(30.0).unwrap();
        assert!(!logs_contain("angle clamped"));
        s.angle(91.0).unwrap();
        assert!(logs_contain("angle clamped"));
    }

    #[test]
    fn test_presets() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.700, 1.850);

        s.left().unwrap();
        assert_eq!(s.last_position_ms(), Some(0.700));
        s.right().unwrap();
        assert_eq!(s.last_position_ms(), Some(1.850));
        s.center().unwrap();
        assert!(close(s.last_position_ms().unwrap(), 1.275));
    }

    #[test]
    fn test_failed_move_keeps_last_position() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);
        s.angle(45.0).unwrap();
        let before = s.last_position_ms();

        bus.fail_start(LineId(8));
        assert!(s.angle(-45.0).unwrap_err().is_hardware_fault());
        assert_eq!(s.last_position_ms(), before);
    }

    #[test]
    fn test_pulse_outside_range_is_clamped() {
        let mut bus = MockBus::new();
        let mut s = servo(&mut bus, 0.550, 1.805);

        s.move_to(3.0).unwrap();
        assert_eq!(s.last_position_ms(), Some(1.805));
    }

    #[test]
    fn test_rejects_pulse_longer_than_cycle() {
        let mut bus = MockBus::new();
        let line = bus.claim(LineId(8)).unwrap();
        // 400 Hz -> 2.5 ms cycle
        let channel = PulseChannel::new(line, 400.0, bus.delay()).unwrap();
        let cal = Calibration::new(0.5, 2.6).unwrap();
        assert!(AngularServo::new(channel, cal, ServoTiming::default()).is_err());
    }
}
