//! Still-frame capture for the camera riding on the jib.
//!
//! The sensor delivers frames padded to hardware-aligned dimensions: the width is
//! rounded up to a multiple of 32 and the height to a multiple of 16. A capture
//! reads one padded luma buffer and crops it back to the requested resolution.
//!
//! The camera is independent of the rig; the application decides when to move and
//! when to shoot.
//!
//! # Device state
//!
//! ```text
//!            open ok                 close() / read reports closed
//!   Closed ----------> Open  ---------------------------------------> Closed
//!     ^                                                                 |
//!     +------------- reopen (bounded by RetryPolicy, once per capture) -+
//! ```
//!
//! # Example
//!
//! ```rust
//! use jib::camera::{Camera, Resolution};
//! use jib::camera::mock::SimulatedSensor;
//! use jib::error_recovery::RetryPolicy;
//!
//! let mut camera = Camera::open(
//!     SimulatedSensor::new(),
//!     Resolution::new(300, 200).unwrap(),
//!     RetryPolicy::default(),
//! )
//! .unwrap();
//! let frame = camera.capture().unwrap();
//! assert_eq!((frame.width(), frame.height()), (300, 200));
//! ```

use chrono::{Local, NaiveDateTime};
use image::GrayImage;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::error::{JibError, JibResult};
use crate::error_recovery::{recover_with, Recoverable, RetryPolicy};

pub mod mock;
pub mod sensor;

pub use sensor::{SensorBackend, StreamSensor};

/// Row alignment of sensor buffers, in pixels.
pub const WIDTH_ALIGNMENT: u32 = 32;
/// Column alignment of sensor buffers, in pixels.
pub const HEIGHT_ALIGNMENT: u32 = 16;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl Resolution {
    /// Validated resolution.
    ///
    /// # Errors
    /// `Configuration` if either dimension is zero.
    pub fn new(width: u32, height: u32) -> JibResult<Self> {
        if width == 0 || height == 0 {
            return Err(JibError::Configuration(format!(
                "resolution must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Dimensions padded to the sensor's buffer alignment.
    pub fn aligned(self) -> Self {
        Self {
            width: self.width.div_ceil(WIDTH_ALIGNMENT) * WIDTH_ALIGNMENT,
            height: self.height.div_ceil(HEIGHT_ALIGNMENT) * HEIGHT_ALIGNMENT,
        }
    }

    /// Number of pixels (one byte each for luma).
    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One captured 8-bit luma frame, row-major. The caller owns the pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Crop the top-left `logical` region out of a padded `aligned` buffer.
    ///
    /// # Errors
    /// `DeviceFault` if `raw` is shorter than `aligned` or `logical` does not fit.
    pub fn crop_from(raw: &[u8], aligned: Resolution, logical: Resolution) -> JibResult<Self> {
        if logical.width > aligned.width || logical.height > aligned.height {
            return Err(JibError::DeviceFault(format!(
                "frame {logical} does not fit in sensor buffer {aligned}"
            )));
        }
        if raw.len() < aligned.pixel_count() {
            return Err(JibError::DeviceFault(format!(
                "short sensor buffer: {} bytes for {aligned}",
                raw.len()
            )));
        }

        let stride = aligned.width as usize;
        let width = logical.width as usize;
        let pixels = raw
            .chunks_exact(stride)
            .take(logical.height as usize)
            .flat_map(|row| &row[..width])
            .copied()
            .collect();

        Ok(Self {
            width: logical.width,
            height: logical.height,
            pixels,
        })
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Frame dimensions.
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Luma value at `(x, y)`, `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Row-major luma bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Take the pixel buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    /// Copy into an `image` buffer.
    pub fn to_image(&self) -> GrayImage {
        // `pixels` always holds exactly `width * height` bytes, so `from_raw` succeeds.
        GrayImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Encode to `path`; the format follows the file extension.
    pub fn save(&self, path: &Path) -> JibResult<()> {
        self.to_image().save(path)?;
        Ok(())
    }
}

/// File name for a snapshot taken at `timestamp`, e.g. `20240305_140709.000042.jpg`.
pub fn snapshot_file_name(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y%m%d_%H%M%S%.6f.jpg").to_string()
}

/// Whether the capture device is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Released or lost; the next capture reopens it.
    Closed,
    /// Ready to read frames.
    Open,
}

/// Frame source with a controlled reopen policy.
#[derive(Debug)]
pub struct Camera<S> {
    sensor: S,
    resolution: Resolution,
    state: DeviceState,
    policy: RetryPolicy,
    output_dir: PathBuf,
    raw: Vec<u8>,
}

struct Reopen<'a, S> {
    sensor: &'a mut S,
    resolution: Resolution,
}

impl<S: SensorBackend> Recoverable for Reopen<'_, S> {
    fn recover(&mut self) -> JibResult<()> {
        self.sensor.close();
        self.sensor.open(self.resolution)
    }
}

impl<S: SensorBackend> Camera<S> {
    /// Open `sensor` at `resolution`.
    ///
    /// # Errors
    /// The sensor's open error (typically `DeviceFault`).
    pub fn open(mut sensor: S, resolution: Resolution, policy: RetryPolicy) -> JibResult<Self> {
        sensor.open(resolution)?;
        info!(%resolution, aligned = %resolution.aligned(), "camera opened");
        Ok(Self {
            sensor,
            resolution,
            state: DeviceState::Open,
            policy,
            output_dir: PathBuf::from("."),
            raw: Vec::new(),
        })
    }

    /// Open `sensor` with the configured resolution, reopen policy and output directory.
    pub fn from_config(sensor: S, config: &CameraConfig) -> JibResult<Self> {
        let resolution = Resolution::new(config.width, config.height)?;
        let camera = Self::open(sensor, resolution, RetryPolicy::attempts(config.reopen_attempts))?;
        Ok(camera.with_output_dir(&config.output_dir))
    }

    /// Directory used for generated snapshot names.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Capture one frame cropped to the logical resolution.
    ///
    /// A closed device is reopened at most once per call (bounded further by the
    /// retry policy) before the capture fails with `DeviceFault`.
    pub fn capture(&mut self) -> JibResult<Frame> {
        let mut reopened = false;
        if !self.is_open() {
            self.reopen()?;
            reopened = true;
        }

        let read = match self.read_raw() {
            Err(JibError::DeviceClosed) if !reopened => {
                warn!("capture device closed during read");
                self.state = DeviceState::Closed;
                self.reopen()?;
                self.read_raw()
            }
            other => other,
        };
        read.map_err(|e| match e {
            JibError::DeviceClosed => {
                self.state = DeviceState::Closed;
                JibError::DeviceFault("device closed again after reopen".to_string())
            }
            other => other,
        })?;

        let frame = Frame::crop_from(&self.raw, self.resolution.aligned(), self.resolution)?;
        debug!(resolution = %self.resolution, "frame captured");
        Ok(frame)
    }

    /// Capture and write a frame; returns the path written.
    ///
    /// Without `path`, a timestamped `.jpg` name inside the output directory is used.
    pub fn save(&mut self, path: Option<&Path>) -> JibResult<PathBuf> {
        let frame = self.capture()?;
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self
                .output_dir
                .join(snapshot_file_name(Local::now().naive_local())),
        };
        frame.save(&path)?;
        info!(path = %path.display(), "snapshot saved");
        Ok(path)
    }

    /// Change the capture resolution. An open sensor is reconfigured immediately.
    pub fn set_resolution(&mut self, width: u32, height: u32) -> JibResult<()> {
        let resolution = Resolution::new(width, height)?;
        self.resolution = resolution;
        self.raw = Vec::with_capacity(resolution.aligned().pixel_count());

        if self.state == DeviceState::Open {
            self.sensor.close();
            if let Err(e) = self.sensor.open(resolution) {
                self.state = DeviceState::Closed;
                return Err(e);
            }
        }
        info!(%resolution, aligned = %resolution.aligned(), "camera resolution set");
        Ok(())
    }

    /// Release the device. The next capture reopens it under the retry policy.
    pub fn close(&mut self) {
        self.sensor.close();
        self.state = DeviceState::Closed;
        info!("camera closed");
    }

    /// Whether the device is open and the sensor agrees.
    pub fn is_open(&self) -> bool {
        self.state == DeviceState::Open && self.sensor.is_open()
    }

    /// Last known device state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Logical capture resolution.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Directory for generated snapshot names.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Underlying sensor backend.
    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Underlying sensor backend, mutably.
    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    fn reopen(&mut self) -> JibResult<()> {
        warn!(max_attempts = self.policy.max_attempts, "reopening capture device");
        let mut reopen = Reopen {
            sensor: &mut self.sensor,
            resolution: self.resolution,
        };
        recover_with(&mut reopen, &self.policy)?;
        self.state = DeviceState::Open;
        Ok(())
    }

    fn read_raw(&mut self) -> JibResult<()> {
        self.raw.resize(self.resolution.aligned().pixel_count(), 0);
        self.sensor.read_frame(&mut self.raw)
    }
}

impl<S> fmt::Display for Camera<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera instance: resolution ({})", self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mock::SimulatedSensor;

    fn camera(width: u32, height: u32) -> Camera<SimulatedSensor> {
        Camera::open(
            SimulatedSensor::new(),
            Resolution::new(width, height).unwrap(),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_alignment() {
        let r = Resolution::new(320, 240).unwrap();
        assert_eq!(r.aligned(), r);

        let r = Resolution::new(300, 200).unwrap();
        assert_eq!(r.aligned(), Resolution::new(320, 208).unwrap());

        let r = Resolution::new(1, 1).unwrap();
        assert_eq!(r.aligned(), Resolution::new(32, 16).unwrap());
    }

    #[test]
    fn test_zero_resolution_rejected() {
        assert!(Resolution::new(0, 240).is_err());
        let mut cam = camera(320, 240);
        assert!(cam.set_resolution(320, 0).is_err());
        assert_eq!(cam.resolution(), Resolution::new(320, 240).unwrap());
    }

    #[test]
    fn test_crop_from_padded_buffer() {
        let aligned = Resolution::new(32, 16).unwrap();
        let logical = Resolution::new(3, 2).unwrap();
        let raw: Vec<u8> = (0..aligned.pixel_count()).map(|i| (i % 256) as u8).collect();

        let frame = Frame::crop_from(&raw, aligned, logical).unwrap();
        assert_eq!(frame.as_bytes(), &[0, 1, 2, 32, 33, 34]);
        assert_eq!(frame.pixel(2, 1), Some(34));
        assert_eq!(frame.pixel(3, 0), None);
    }

    #[test]
    fn test_to_image_keeps_row_order() {
        let aligned = Resolution::new(32, 16).unwrap();
        let logical = Resolution::new(3, 2).unwrap();
        let raw: Vec<u8> = (0..aligned.pixel_count()).map(|i| (i % 256) as u8).collect();
        let frame = Frame::crop_from(&raw, aligned, logical).unwrap();

        let image = frame.to_image();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [34]);
        assert_eq!(image.as_raw().as_slice(), frame.as_bytes());
    }

    #[test]
    fn test_short_buffer_is_device_fault() {
        let aligned = Resolution::new(32, 16).unwrap();
        let err = Frame::crop_from(&[0u8; 10], aligned, aligned).unwrap_err();
        assert!(err.is_device_fault());
    }

    #[test]
    fn test_capture_crops_padding() {
        let mut cam = camera(300, 200);
        let frame = cam.capture().unwrap();

        assert_eq!(frame.resolution(), Resolution::new(300, 200).unwrap());
        assert_eq!(frame.as_bytes().len(), 300 * 200);
        assert!(frame.as_bytes().iter().all(|&p| p != mock::PADDING_VALUE));
        assert_eq!(frame.pixel(299, 199), Some(mock::pattern(299, 199)));
        assert_eq!(cam.sensor().last_buffer_len(), 320 * 208);
    }

    #[test]
    fn test_set_resolution_reconfigures_open_sensor() {
        let mut cam = camera(320, 240);
        cam.set_resolution(100, 50).unwrap();

        let frame = cam.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (100, 50));
        assert_eq!(cam.sensor().last_buffer_len(), 128 * 64);
        assert_eq!(cam.sensor().open_count(), 2);
    }

    #[test]
    fn test_closed_camera_reopens_once() {
        let mut cam = camera(64, 32);
        cam.close();
        assert_eq!(cam.state(), DeviceState::Closed);

        cam.capture().unwrap();
        assert_eq!(cam.state(), DeviceState::Open);
        assert_eq!(cam.sensor().open_count(), 2);
    }

    #[test]
    fn test_reopen_failure_is_device_fault() {
        let mut cam = camera(64, 32);
        cam.close();
        cam.sensor_mut().refuse_open(true);

        let err = cam.capture().unwrap_err();
        assert!(matches!(err, JibError::DeviceFault(_)));
        assert_eq!(cam.state(), DeviceState::Closed);
        // One attempt under the default policy.
        assert_eq!(cam.sensor().open_attempts(), 2);
    }

    #[test]
    fn test_device_dropping_mid_session_is_recovered() {
        let mut cam = camera(64, 32);
        cam.sensor_mut().disconnect_after(1);

        cam.capture().unwrap();
        cam.capture().unwrap();
        assert_eq!(cam.sensor().open_count(), 2);
        assert_eq!(cam.sensor().frames_read(), 2);
    }

    #[test]
    fn test_persistent_disconnect_is_not_masked() {
        let mut cam = camera(64, 32);
        cam.sensor_mut().always_disconnect(true);

        let err = cam.capture().unwrap_err();
        assert!(err.is_device_fault());
        assert_eq!(cam.state(), DeviceState::Closed);
    }

    #[test]
    fn test_snapshot_file_name() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(14, 7, 9, 42)
            .unwrap();
        assert_eq!(snapshot_file_name(ts), "20240305_140709.000042.jpg");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            camera(320, 240).to_string(),
            "Camera instance: resolution (320x240)"
        );
    }
}
