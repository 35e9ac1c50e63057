//! Jib configuration using Figment.
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults (the calibration of the stock rig)
//! 2. A TOML file (`jib.toml` by default; a missing file is not an error)
//! 3. Environment variables prefixed with `JIB_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! JIB_LOG__LEVEL=debug
//! JIB_PAN__LEFT_PULSE_MS=0.560
//! JIB_GPIO__NUMBERING=bcm
//! ```
//!
//! # Example
//!
//! ```toml
//! [gpio]
//! numbering = "board"
//!
//! [pan]
//! line = 8
//! left_pulse_ms = 0.550
//! right_pulse_ms = 1.805
//!
//! [tilt]
//! line = 10
//! left_pulse_ms = 0.700
//! right_pulse_ms = 1.850
//! stub_delay_ms = 100
//!
//! [camera]
//! width = 320
//! height = 240
//! output_dir = "/home/pi/snaps"
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{JibError, JibResult};
use crate::hardware::{cycle_ms, LineId, PinNumbering};
use crate::servo::{Calibration, ServoTiming, DEFAULT_FREQUENCY_HZ};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "jib.toml";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "JIB_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JibConfig {
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// GPIO access settings
    #[serde(default)]
    pub gpio: GpioConfig,
    /// Pan (X axis) servo
    pub pan: ServoConfig,
    /// Tilt (Y axis) servo
    pub tilt: ServoConfig,
    /// Still camera settings
    #[serde(default)]
    pub camera: CameraConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// GPIO access configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpioConfig {
    /// How servo line numbers are interpreted
    #[serde(default)]
    pub numbering: PinNumbering,
}

/// One servo's wiring, calibration and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServoConfig {
    /// Output line the servo signal wire is connected to
    pub line: LineId,
    /// Pulse width at the -90° stop
    pub left_pulse_ms: f64,
    /// Pulse width at the +90° stop
    pub right_pulse_ms: f64,
    /// PWM frequency
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    /// Pad added to every hold
    #[serde(default = "default_stub_delay_ms")]
    pub stub_delay_ms: u64,
    /// Hold for a full-range move
    #[serde(default = "default_max_settle_ms")]
    pub max_settle_ms: u64,
}

/// Still camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Logical frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,
    /// Logical frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
    /// Directory for generated snapshot file names
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Reopen attempts when the device turns out to be closed
    #[serde(default = "default_reopen_attempts")]
    pub reopen_attempts: u32,
    /// Raw YUV420 source (device node or FIFO); the simulated sensor when unset
    #[serde(default)]
    pub device: Option<PathBuf>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_stub_delay_ms() -> u64 {
    100
}

fn default_max_settle_ms() -> u64 {
    500
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    240
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_reopen_attempts() -> u32 {
    1
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            output_dir: default_output_dir(),
            reopen_attempts: default_reopen_attempts(),
            device: None,
        }
    }
}

impl ServoConfig {
    /// Servo on `line` with the given endpoints and default timing.
    pub fn new(line: LineId, left_pulse_ms: f64, right_pulse_ms: f64) -> Self {
        Self {
            line,
            left_pulse_ms,
            right_pulse_ms,
            frequency_hz: default_frequency(),
            stub_delay_ms: default_stub_delay_ms(),
            max_settle_ms: default_max_settle_ms(),
        }
    }

    /// Validated calibration.
    pub fn calibration(&self) -> JibResult<Calibration> {
        Calibration::new(self.left_pulse_ms, self.right_pulse_ms)
    }

    /// Hold timing.
    pub fn timing(&self) -> ServoTiming {
        ServoTiming {
            stub_delay: Duration::from_millis(self.stub_delay_ms),
            max_settle: Duration::from_millis(self.max_settle_ms),
        }
    }

    fn validate(&self, name: &str) -> JibResult<()> {
        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return Err(JibError::Configuration(format!(
                "{name}: frequency_hz must be positive, got {}",
                self.frequency_hz
            )));
        }
        self.calibration().map_err(|e| match e {
            JibError::Configuration(msg) => JibError::Configuration(format!("{name}: {msg}")),
            other => other,
        })?;
        let cycle = cycle_ms(self.frequency_hz);
        if self.right_pulse_ms >= cycle {
            return Err(JibError::Configuration(format!(
                "{name}: right_pulse_ms {} does not fit in a {cycle} ms cycle",
                self.right_pulse_ms
            )));
        }
        if self.max_settle_ms == 0 {
            return Err(JibError::Configuration(format!(
                "{name}: max_settle_ms must be greater than zero"
            )));
        }
        Ok(())
    }
}

impl Default for JibConfig {
    /// Stock rig: pan on header pin 8, tilt on header pin 10.
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            gpio: GpioConfig::default(),
            pan: ServoConfig::new(LineId(8), 0.550, 1.805),
            tilt: ServoConfig::new(LineId(10), 0.700, 1.850),
            camera: CameraConfig::default(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl JibConfig {
    /// Load from `jib.toml` in the working directory and the environment.
    pub fn load() -> JibResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific TOML file and the environment, then validate.
    ///
    /// # Errors
    /// `Config` if a source cannot be parsed, `Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> JibResult<Self> {
        Self::extract(
            Self::base_figment()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Parse a TOML document layered over the defaults, without the environment.
    pub fn from_toml_str(toml: &str) -> JibResult<Self> {
        Self::extract(Self::base_figment().merge(Toml::string(toml)))
    }

    /// Render as TOML, e.g. to seed a `jib.toml`.
    pub fn to_toml_string(&self) -> JibResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| JibError::Configuration(format!("cannot serialize configuration: {e}")))
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn extract(figment: Figment) -> JibResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse fine but cannot drive the rig.
    ///
    /// Checks:
    /// - Log level is valid
    /// - Both servos have a usable calibration that fits the PWM cycle
    /// - Pan and tilt are on different lines
    /// - Camera dimensions are non-zero
    pub fn validate(&self) -> JibResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.as_str()) {
            return Err(JibError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            )));
        }

        self.pan.validate("pan")?;
        self.tilt.validate("tilt")?;

        let mut lines = HashSet::new();
        for (name, servo) in [("pan", &self.pan), ("tilt", &self.tilt)] {
            if !lines.insert(servo.line) {
                return Err(JibError::Configuration(format!(
                    "{name}: line {} is already used by another servo",
                    servo.line
                )));
            }
            if self.gpio.numbering.to_bcm(servo.line).is_none() {
                return Err(JibError::Configuration(format!(
                    "{name}: line {} is not a GPIO pin in {:?} numbering",
                    servo.line, self.gpio.numbering
                )));
            }
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(JibError::Configuration(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_calibration() {
        let config = JibConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pan.line, LineId(8));
        assert_eq!(config.pan.left_pulse_ms, 0.550);
        assert_eq!(config.tilt.right_pulse_ms, 1.850);
        assert_eq!(config.pan.timing(), ServoTiming::default());
        assert_eq!(config.gpio.numbering, PinNumbering::Board);
        assert_eq!((config.camera.width, config.camera.height), (320, 240));
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config = JibConfig::from_toml_str(
            r#"
            [pan]
            left_pulse_ms = 0.600

            [camera]
            width = 300
            height = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.pan.left_pulse_ms, 0.600);
        assert_eq!(config.pan.right_pulse_ms, 1.805);
        assert_eq!(config.tilt, JibConfig::default().tilt);
        assert_eq!(config.camera.width, 300);
    }

    #[test]
    fn test_inverted_calibration_rejected() {
        let err = JibConfig::from_toml_str(
            r#"
            [tilt]
            left_pulse_ms = 2.0
            right_pulse_ms = 1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, JibError::Configuration(ref msg) if msg.starts_with("tilt")));
    }

    #[test]
    fn test_shared_line_rejected() {
        let err = JibConfig::from_toml_str("[tilt]\nline = 8\n").unwrap_err();
        assert!(err.to_string().contains("already used"));
    }

    #[test]
    fn test_power_pin_rejected_in_board_numbering() {
        assert!(JibConfig::from_toml_str("[pan]\nline = 2\n").is_err());
        assert!(JibConfig::from_toml_str("[gpio]\nnumbering = \"bcm\"\n[pan]\nline = 2\n").is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(JibConfig::from_toml_str("[log]\nlevel = \"loud\"\n").is_err());
    }

    #[test]
    fn test_type_error_is_config_error() {
        let err = JibConfig::from_toml_str("[pan]\nleft_pulse_ms = \"wide\"\n").unwrap_err();
        assert!(matches!(err, JibError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tilt]\nstub_delay_ms = 20\nmax_settle_ms = 800").unwrap();

        let config = JibConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.tilt.timing(),
            ServoTiming {
                stub_delay: Duration::from_millis(20),
                max_settle: Duration::from_millis(800),
            }
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = JibConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pan, JibConfig::default().pan);
    }

    #[test]
    fn test_rendered_toml_loads_back() {
        let mut config = JibConfig::default();
        config.tilt.stub_delay_ms = 250;
        config.camera.device = Some(PathBuf::from("/dev/video0"));

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[pan]"));
        assert_eq!(JibConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
