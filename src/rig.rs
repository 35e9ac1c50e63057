//! Pan-tilt rig ("jib"): two angular servos carrying the camera.
//!
//! The rig owns one servo per axis and remembers the last angle each axis was
//! successfully commanded to. That angle is the base for incremental moves, so it
//! always holds the clamped value, never the raw request.
//!
//! Both axes are driven from the calling thread one after the other (pan, then
//! tilt). A two-axis move therefore takes the sum of both settle times, and a
//! failure on the second axis leaves the first one moved; that case is reported as
//! [`JibError::PartialMove`].
//!
//! Tilt angles grow downwards: "up" subtracts from the tilt angle.

use tracing::info;

use crate::config::JibConfig;
use crate::error::{Axis, JibError, JibResult};
use crate::hardware::{Delay, PwmBus, PwmLine, ThreadDelay};
use crate::servo::{AngularServo, MAX_ANGLE_DEG, MIN_ANGLE_DEG};

/// Default increment for the directional moves, in degrees.
pub const DEFAULT_STEP_DEG: f64 = 5.0;

/// Two-axis jib.
#[derive(Debug)]
pub struct PanTiltRig<L, D = ThreadDelay> {
    pan: AngularServo<L, D>,
    tilt: AngularServo<L, D>,
    pan_angle: f64,
    tilt_angle: f64,
}

impl<L: PwmLine, D: Delay> PanTiltRig<L, D> {
    /// Take ownership of both servos and centre the rig.
    ///
    /// # Errors
    /// Any failure while centring; the servos are dropped (and their lines released).
    pub fn new(pan: AngularServo<L, D>, tilt: AngularServo<L, D>) -> JibResult<Self> {
        let mut rig = Self {
            pan,
            tilt,
            pan_angle: 0.0,
            tilt_angle: 0.0,
        };
        rig.center()?;
        info!(
            pan_line = %rig.pan.line_id(),
            tilt_line = %rig.tilt.line_id(),
            "jib ready and centred"
        );
        Ok(rig)
    }

    /// Claim both servo lines from `bus` as configured and centre the rig.
    pub fn from_config<B>(bus: &mut B, config: &JibConfig, delay: D) -> JibResult<Self>
    where
        B: PwmBus<Line = L>,
        D: Clone,
    {
        let pan = AngularServo::from_config(bus, &config.pan, delay.clone())?;
        let tilt = AngularServo::from_config(bus, &config.tilt, delay)?;
        Self::new(pan, tilt)
    }

    // ------------------------------------------------------------------------
    // Absolute moves
    // ------------------------------------------------------------------------

    /// Move the pan axis; returns the clamped angle applied.
    pub fn move_pan(&mut self, degrees: f64) -> JibResult<f64> {
        let applied = self.pan.angle(degrees)?;
        self.pan_angle = applied;
        Ok(applied)
    }

    /// Move the tilt axis; returns the clamped angle applied.
    pub fn move_tilt(&mut self, degrees: f64) -> JibResult<f64> {
        let applied = self.tilt.angle(degrees)?;
        self.tilt_angle = applied;
        Ok(applied)
    }

    /// Move both axes, pan first.
    ///
    /// # Errors
    /// The pan error as is if nothing moved, or [`JibError::PartialMove`] if pan
    /// moved and tilt failed.
    pub fn move_to(&mut self, pan_degrees: f64, tilt_degrees: f64) -> JibResult<(f64, f64)> {
        let pan = self.move_pan(pan_degrees)?;
        let tilt = self
            .move_tilt(tilt_degrees)
            .map_err(|source| JibError::PartialMove {
                completed: Axis::Pan,
                failed: Axis::Tilt,
                source: Box::new(source),
            })?;
        Ok((pan, tilt))
    }

    /// Move one axis by angle.
    pub fn move_axis(&mut self, axis: Axis, degrees: f64) -> JibResult<f64> {
        match axis {
            Axis::Pan => self.move_pan(degrees),
            Axis::Tilt => self.move_tilt(degrees),
        }
    }

    // ------------------------------------------------------------------------
    // Incremental moves
    // ------------------------------------------------------------------------

    /// Move the pan axis by `delta` degrees from its current angle.
    pub fn move_pan_relative(&mut self, delta: f64) -> JibResult<f64> {
        self.move_pan(self.pan_angle + delta)
    }

    /// Move the tilt axis by `delta` degrees from its current angle.
    pub fn move_tilt_relative(&mut self, delta: f64) -> JibResult<f64> {
        self.move_tilt(self.tilt_angle + delta)
    }

    /// Pan left by `delta` degrees.
    pub fn move_left(&mut self, delta: f64) -> JibResult<f64> {
        self.move_pan_relative(-delta)
    }

    /// Pan right by `delta` degrees.
    pub fn move_right(&mut self, delta: f64) -> JibResult<f64> {
        self.move_pan_relative(delta)
    }

    /// Tilt up (towards -90°) by `delta` degrees.
    pub fn move_up(&mut self, delta: f64) -> JibResult<f64> {
        self.move_tilt_relative(-delta)
    }

    /// Tilt down (towards +90°) by `delta` degrees.
    pub fn move_down(&mut self, delta: f64) -> JibResult<f64> {
        self.move_tilt_relative(delta)
    }

    /// [`move_left`](Self::move_left) by [`DEFAULT_STEP_DEG`].
    pub fn step_left(&mut self) -> JibResult<f64> {
        self.move_left(DEFAULT_STEP_DEG)
    }

    /// [`move_right`](Self::move_right) by [`DEFAULT_STEP_DEG`].
    pub fn step_right(&mut self) -> JibResult<f64> {
        self.move_right(DEFAULT_STEP_DEG)
    }

    /// [`move_up`](Self::move_up) by [`DEFAULT_STEP_DEG`].
    pub fn step_up(&mut self) -> JibResult<f64> {
        self.move_up(DEFAULT_STEP_DEG)
    }

    /// [`move_down`](Self::move_down) by [`DEFAULT_STEP_DEG`].
    pub fn step_down(&mut self) -> JibResult<f64> {
        self.move_down(DEFAULT_STEP_DEG)
    }

    // ------------------------------------------------------------------------
    // Presets
    // ------------------------------------------------------------------------

    /// Centre both axes.
    pub fn center(&mut self) -> JibResult<()> {
        info!("centring jib");
        self.move_to(0.0, 0.0).map(|_| ())
    }

    /// Pan to 0°.
    pub fn center_pan(&mut self) -> JibResult<f64> {
        self.move_pan(0.0)
    }

    /// Tilt to 0°.
    pub fn center_tilt(&mut self) -> JibResult<f64> {
        self.move_tilt(0.0)
    }

    /// Pan to -90°.
    pub fn pan_extreme_left(&mut self) -> JibResult<f64> {
        self.move_pan(MIN_ANGLE_DEG)
    }

    /// Pan to +90°.
    pub fn pan_extreme_right(&mut self) -> JibResult<f64> {
        self.move_pan(MAX_ANGLE_DEG)
    }

    /// Tilt to -90°.
    pub fn tilt_extreme_up(&mut self) -> JibResult<f64> {
        self.move_tilt(MIN_ANGLE_DEG)
    }

    /// Tilt to +90°.
    pub fn tilt_extreme_down(&mut self) -> JibResult<f64> {
        self.move_tilt(MAX_ANGLE_DEG)
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Last applied pan angle.
    pub fn pan_angle(&self) -> f64 {
        self.pan_angle
    }

    /// Last applied tilt angle.
    pub fn tilt_angle(&self) -> f64 {
        self.tilt_angle
    }

    /// `(pan, tilt)` in degrees.
    pub fn angles(&self) -> (f64, f64) {
        (self.pan_angle, self.tilt_angle)
    }

    /// Pan servo.
    pub fn pan(&self) -> &AngularServo<L, D> {
        &self.pan
    }

    /// Tilt servo.
    pub fn tilt(&self) -> &AngularServo<L, D> {
        &self.tilt
    }

    /// Split the rig into its servos, e.g. to drive both axes from separate threads.
    pub fn into_servos(self) -> (AngularServo<L, D>, AngularServo<L, D>) {
        (self.pan, self.tilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockBus, MockDelay, MockLine};
    use crate::hardware::{LineId, PwmBus};

    const PAN: LineId = LineId(8);
    const TILT: LineId = LineId(10);

    fn rig(bus: &mut MockBus) -> PanTiltRig<MockLine, MockDelay> {
        let delay = bus.delay();
        PanTiltRig::from_config(bus, &JibConfig::default(), delay).unwrap()
    }

    #[test]
    fn test_rig_centred_after_construction() {
        let mut bus = MockBus::new();
        let rig = rig(&mut bus);

        assert_eq!(rig.angles(), (0.0, 0.0));
        assert_eq!(bus.duties(PAN).len(), 1);
        assert_eq!(bus.duties(TILT).len(), 1);
        assert!(!bus.is_energized(PAN));
        assert!(!bus.is_energized(TILT));
    }

    #[test]
    fn test_relative_move_clamps_at_limit() {
        let mut bus = MockBus::new();
        let mut rig = rig(&mut bus);

        rig.move_pan(88.0).unwrap();
        assert_eq!(rig.move_right(5.0).unwrap(), 90.0);
        assert_eq!(rig.pan_angle(), 90.0);

        rig.move_tilt(-88.0).unwrap();
        assert_eq!(rig.step_up().unwrap(), -90.0);
        assert_eq!(rig.tilt_angle(), -90.0);
    }

    #[test]
    fn test_directional_moves() {
        let mut bus = MockBus::new();
        let mut rig = rig(&mut bus);

        rig.step_left().unwrap();
        rig.step_left().unwrap();
        rig.step_down().unwrap();
        assert_eq!(rig.angles(), (-10.0, 5.0));

        rig.move_right(25.0).unwrap();
        rig.move_up(15.0).unwrap();
        assert_eq!(rig.angles(), (15.0, -10.0));
    }

    #[test]
    fn test_presets() {
        let mut bus = MockBus::new();
        let mut rig = rig(&mut bus);

        rig.pan_extreme_left().unwrap();
        rig.tilt_extreme_down().unwrap();
        assert_eq!(rig.angles(), (-90.0, 90.0));
        assert_eq!(rig.pan().last_position_ms(), Some(0.550));
        assert_eq!(rig.tilt().last_position_ms(), Some(1.850));

        rig.pan_extreme_right().unwrap();
        rig.tilt_extreme_up().unwrap();
        assert_eq!(rig.angles(), (90.0, -90.0));

        rig.center_pan().unwrap();
        assert_eq!(rig.angles(), (0.0, -90.0));
        rig.center_tilt().unwrap();
        assert_eq!(rig.angles(), (0.0, 0.0));
    }

    #[test]
    fn test_failed_move_keeps_angle() {
        let mut bus = MockBus::new();
        let mut rig = rig(&mut bus);
        rig.move_tilt(30.0).unwrap();

        bus.fail_start(TILT);
        assert!(rig.move_tilt(-30.0).is_err());
        assert_eq!(rig.tilt_angle(), 30.0);
    }

    #[test]
    fn test_second_axis_failure_is_partial_move() {
        let mut bus = MockBus::new();
        let mut rig = rig(&mut bus);
        bus.fail_start(TILT);

        let err = rig.move_to(40.0, 20.0).unwrap_err();
        match err {
            JibError::PartialMove {
                completed, failed, ..
            } => {
                assert_eq!(completed, Axis::Pan);
                assert_eq!(failed, Axis::Tilt);
            }
            other => panic!("expected PartialMove, got {other:?}"),
        }
        assert_eq!(rig.angles(), (40.0, 0.0));
    }

    #[test]
    fn test_first_axis_failure_moves_nothing() {
        let mut bus = MockBus::new();
        let mut rig = rig(&mut bus);
        bus.fail_start(PAN);
        bus.clear_events();

        let err = rig.move_to(40.0, 20.0).unwrap_err();
        assert!(matches!(err, JibError::HardwareFault { line, .. } if line == PAN));
        assert!(bus.duties(TILT).is_empty());
        assert_eq!(rig.angles(), (0.0, 0.0));
    }

    #[test]
    fn test_construction_fails_when_centring_fails() {
        let mut bus = MockBus::new();
        bus.fail_start(TILT);
        let delay = bus.delay();

        let result = PanTiltRig::from_config(&mut bus, &JibConfig::default(), delay);
        assert!(matches!(result, Err(JibError::PartialMove { .. })));
        // Lines are released with the dropped servos.
        assert!(!bus.is_claimed(PAN));
        assert!(!bus.is_claimed(TILT));
    }

    #[test]
    fn test_claim_conflict_surfaces() {
        let mut bus = MockBus::new();
        let _held = bus.claim(TILT).unwrap();
        let delay = bus.delay();

        let result = PanTiltRig::from_config(&mut bus, &JibConfig::default(), delay);
        assert!(matches!(result, Err(JibError::LineBusy(TILT))));
    }
}
