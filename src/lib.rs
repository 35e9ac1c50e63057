//! Core library for the pan-tilt camera jib.
//!
//! Two hobby servos on PWM lines aim a camera: one pans, one tilts. This library
//! contains the pulse-line abstraction and its backends, the calibrated angular
//! servo, the two-axis rig with its presets and incremental moves, and the still
//! camera. It is used by the `jib` command line tool.
//!
//! Everything runs on the calling thread. Servo moves block for their settle
//! time while the line is energised.

pub mod camera;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod hardware;
pub mod logging;
pub mod rig;
pub mod servo;

pub use camera::{Camera, Frame, Resolution};
pub use config::JibConfig;
pub use error::{Axis, JibError, JibResult};
pub use rig::PanTiltRig;
pub use servo::{AngularServo, Calibration};
