//! Simulated sensor for tests and for running the CLI off-target.
//!
//! Frames carry a deterministic pattern in the logical area and
//! [`PADDING_VALUE`] in the alignment padding, so cropping mistakes show up.

use tracing::debug;

use super::sensor::SensorBackend;
use super::Resolution;
use crate::error::{JibError, JibResult};

/// Fill byte for the padded border of simulated frames.
pub const PADDING_VALUE: u8 = 0xFF;

/// Luma value of the simulated scene at `(x, y)`. Never equals [`PADDING_VALUE`].
pub fn pattern(x: u32, y: u32) -> u8 {
    ((x * 7 + y * 3) % 251) as u8
}

// =============================================================================
// SimulatedSensor
// =============================================================================

/// In-memory sensor with scriptable disconnects.
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    resolution: Option<Resolution>,
    open: bool,
    refuse_open: bool,
    disconnect_in: Option<u64>,
    always_disconnect: bool,
    open_attempts: u32,
    open_count: u32,
    frames_read: u64,
    last_buffer_len: usize,
}

impl SimulatedSensor {
    /// Closed sensor with no scripted faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent open fail.
    pub fn refuse_open(&mut self, refuse: bool) {
        self.refuse_open = refuse;
    }

    /// Report the device as closed once, after `frames` more successful reads.
    pub fn disconnect_after(&mut self, frames: u64) {
        self.disconnect_in = Some(frames);
    }

    /// Report the device as closed on every read.
    pub fn always_disconnect(&mut self, enabled: bool) {
        self.always_disconnect = enabled;
    }

    /// Calls to `open`, including failed ones.
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts
    }

    /// Successful opens.
    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    /// Frames delivered successfully.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Size of the buffer handed to the last read.
    pub fn last_buffer_len(&self) -> usize {
        self.last_buffer_len
    }
}

impl SensorBackend for SimulatedSensor {
    fn open(&mut self, resolution: Resolution) -> JibResult<()> {
        self.open_attempts += 1;
        if self.refuse_open {
            return Err(JibError::DeviceFault(
                "simulated sensor refused to open".to_string(),
            ));
        }
        self.resolution = Some(resolution);
        self.open = true;
        self.open_count += 1;
        debug!(%resolution, "simulated sensor opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> JibResult<()> {
        let resolution = match (self.open, self.resolution) {
            (true, Some(resolution)) => resolution,
            _ => return Err(JibError::DeviceClosed),
        };

        if self.always_disconnect || self.disconnect_in == Some(0) {
            self.disconnect_in = None;
            self.open = false;
            return Err(JibError::DeviceClosed);
        }
        if let Some(remaining) = self.disconnect_in.as_mut() {
            *remaining -= 1;
        }

        let aligned = resolution.aligned();
        if buf.len() != aligned.pixel_count() {
            return Err(JibError::DeviceFault(format!(
                "buffer of {} bytes does not match {aligned}",
                buf.len()
            )));
        }

        for (y, row) in buf.chunks_exact_mut(aligned.width as usize).enumerate() {
            let y = y as u32;
            for (x, px) in row.iter_mut().enumerate() {
                let x = x as u32;
                *px = if x < resolution.width && y < resolution.height {
                    pattern(x, y)
                } else {
                    PADDING_VALUE
                };
            }
        }

        self.frames_read += 1;
        self.last_buffer_len = buf.len();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}
