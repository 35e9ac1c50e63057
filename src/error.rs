//! Custom error types for the jib.
//!
//! This module defines the primary error type, `JibError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent way to report what can
//! go wrong between the PWM lines, the camera sensor and the configuration files.
//!
//! ## Error Hierarchy
//!
//! - **`HardwareFault`** / **`LineBusy`**: a PWM line could not be claimed or driven.
//!   Fatal to the attempted move and never retried automatically.
//! - **`DeviceFault`** / **`DeviceClosed`**: the capture device is unavailable. The
//!   camera turns `DeviceClosed` into one controlled reopen before giving up with
//!   `DeviceFault`.
//! - **`PartialMove`**: a two-axis command where the first axis moved and the second
//!   did not. The rig is left in that mixed state and the caller is told which axis
//!   completed.
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic
//!   validation failures (e.g. a left calibration point above the right one).
//! - **`Io`** / **`Image`**: writing captured frames to disk.
//!
//! Angles and pulse widths are never rejected: out-of-range input is clamped to the
//! valid envelope, so there is no "invalid angle" variant.

use crate::hardware::LineId;
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type JibResult<T> = std::result::Result<T, JibError>;

/// One of the two mechanical axes of the jib.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Horizontal rotation (X axis).
    Pan,
    /// Vertical rotation (Y axis).
    Tilt,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pan => write!(f, "pan"),
            Self::Tilt => write!(f, "tilt"),
        }
    }
}

/// Everything that can go wrong in the jib.
#[derive(Error, Debug)]
pub enum JibError {
    /// A PWM line could not be claimed or driven.
    #[error("Hardware fault on line {line}: {reason}")]
    HardwareFault {
        /// Line that failed.
        line: LineId,
        /// Backend error text.
        reason: String,
    },

    /// The line is already owned by another channel.
    #[error("Line {0} is already claimed by another channel")]
    LineBusy(LineId),

    /// The GPIO peripheral itself could not be opened; no line was involved.
    #[error("GPIO device unavailable: {0}")]
    GpioUnavailable(String),

    /// The capture device failed or could not be reopened.
    #[error("Capture device fault: {0}")]
    DeviceFault(String),

    /// The capture device reported itself closed.
    #[error("Capture device is closed")]
    DeviceClosed,

    /// The first axis of a two-axis move completed and the second failed.
    #[error("{completed} axis moved but {failed} axis failed: {source}")]
    PartialMove {
        /// Axis left at its new angle.
        completed: Axis,
        /// Axis left at its previous angle.
        failed: Axis,
        /// Why the second axis failed.
        #[source]
        source: Box<JibError>,
    },

    /// A configuration source could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but describes a rig that cannot work.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system error while writing frames.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be encoded.
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl JibError {
    /// Build a hardware fault for `line` from any displayable cause.
    pub fn hardware(line: LineId, reason: impl fmt::Display) -> Self {
        Self::HardwareFault {
            line,
            reason: reason.to_string(),
        }
    }

    /// True for every failure that means a PWM line could not be claimed or driven,
    /// including one buried inside a [`JibError::PartialMove`].
    pub fn is_hardware_fault(&self) -> bool {
        match self {
            Self::HardwareFault { .. } | Self::LineBusy(_) | Self::GpioUnavailable(_) => true,
            Self::PartialMove { source, .. } => source.is_hardware_fault(),
            _ => false,
        }
    }

    /// True for capture device failures.
    pub fn is_device_fault(&self) -> bool {
        matches!(self, Self::DeviceFault(_) | Self::DeviceClosed)
    }
}
