//! Sensor backends that hand padded luma frames to [`Camera`](super::Camera).

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{debug, info};

use super::Resolution;
use crate::error::{JibError, JibResult};

/// A source of raw frames.
///
/// Buffers passed to [`read_frame`](SensorBackend::read_frame) hold exactly
/// `resolution.aligned().pixel_count()` bytes for the resolution last opened.
pub trait SensorBackend {
    /// Open (or reopen) the device at the logical `resolution`.
    fn open(&mut self, resolution: Resolution) -> JibResult<()>;

    /// Whether frames can be read without reopening.
    fn is_open(&self) -> bool;

    /// Fill `buf` with one padded luma frame.
    ///
    /// # Errors
    /// `DeviceClosed` when the device went away, `DeviceFault` for anything else.
    fn read_frame(&mut self, buf: &mut [u8]) -> JibResult<()>;

    /// Release the device. Closing twice is harmless.
    fn close(&mut self);
}

type Opener<R> = Box<dyn FnMut(Resolution) -> io::Result<R> + Send>;

/// Reads YUV420 planar frames from a byte stream and keeps the Y plane.
///
/// Each frame on the wire is `w * h` luma bytes followed by `w * h / 2` chroma
/// bytes, at the aligned resolution. End of stream is reported as a closed device.
pub struct StreamSensor<R> {
    opener: Opener<R>,
    reader: Option<R>,
    resolution: Option<Resolution>,
    chroma: Vec<u8>,
}

impl<R: Read> StreamSensor<R> {
    /// `opener` is called on every open with the logical resolution.
    pub fn new(opener: impl FnMut(Resolution) -> io::Result<R> + Send + 'static) -> Self {
        Self {
            opener: Box::new(opener),
            reader: None,
            resolution: None,
            chroma: Vec::new(),
        }
    }
}

impl StreamSensor<File> {
    /// Sensor backed by a device node or recorded file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(move |_| File::open(&path))
    }
}

impl<R: Read> SensorBackend for StreamSensor<R> {
    fn open(&mut self, resolution: Resolution) -> JibResult<()> {
        let reader = (self.opener)(resolution)
            .map_err(|e| JibError::DeviceFault(format!("cannot open capture stream: {e}")))?;
        let aligned = resolution.aligned();
        self.reader = Some(reader);
        self.resolution = Some(resolution);
        self.chroma = vec![0; aligned.pixel_count() / 2];
        info!(%resolution, %aligned, "capture stream opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> JibResult<()> {
        let reader = self.reader.as_mut().ok_or(JibError::DeviceClosed)?;

        let read = reader
            .read_exact(buf)
            .and_then(|()| reader.read_exact(&mut self.chroma));
        match read {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("capture stream ended");
                self.reader = None;
                Err(JibError::DeviceClosed)
            }
            Err(e) => Err(JibError::DeviceFault(format!("frame read failed: {e}"))),
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

impl<R> fmt::Debug for StreamSensor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSensor")
            .field("open", &self.reader.is_some())
            .field("resolution", &self.resolution)
            .finish_non_exhaustive()
    }
}
