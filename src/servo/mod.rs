//! Servo positioning: pulse channels and calibrated angular servos.

pub mod angular;
pub mod channel;

pub use angular::{
    clamp_angle, AngularServo, Calibration, ServoTiming, MAX_ANGLE_DEG, MIN_ANGLE_DEG,
};
pub use channel::{PulseChannel, DEFAULT_FREQUENCY_HZ};
