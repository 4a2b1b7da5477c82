//! Error types, one closed enumeration per component.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::image::ImageKind;
use crate::sinks::SinkKind;
use crate::traits::{ControlKind, FourCC};

/// Device session failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The device node could not be opened for reading and writing.
    #[error("cannot open capture device {}", .path.display())]
    DeviceUnavailable {
        /// Device node path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The device lacks video capture or streaming I/O support.
    #[error("device is not a streaming video capture device")]
    NotACaptureDevice(#[source] Option<io::Error>),

    /// Requesting a pixel encoding failed.
    #[error("cannot select pixel format {0}")]
    FormatRequestFailed(FourCC, #[source] io::Error),

    /// Querying the pixel format and geometry failed.
    #[error("cannot query pixel format")]
    FormatQueryFailed(#[source] io::Error),

    /// Buffer pool negotiation or teardown failed.
    #[error("buffer pool failure")]
    Pool(#[from] PoolError),

    /// The device rejected the control identifier.
    #[error("{control} control is not supported by the device")]
    ControlUnsupported {
        /// Control being written.
        control: ControlKind,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The device rejected the control value.
    #[error("{control} value {value} is out of range")]
    ControlOutOfRange {
        /// Control being written.
        control: ControlKind,
        /// Rejected value.
        value: i32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Any other control communication failure.
    #[error("cannot set {control} control")]
    ControlIo {
        /// Control being written.
        control: ControlKind,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `VIDIOC_STREAMON` or `VIDIOC_STREAMOFF` failed.
    #[error("cannot switch streaming {}", stream_direction(.on))]
    StreamControlFailed {
        /// Direction of the request.
        on: bool,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The session is already closed.
    #[error("device session is closed")]
    Closed,

    /// Closing the device handle failed.
    #[error("cannot close capture device")]
    CloseFailed(#[source] io::Error),
}

fn stream_direction(on: &bool) -> &'static str {
    if *on {
        "on"
    } else {
        "off"
    }
}

/// Buffer pool failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// `VIDIOC_REQBUFS` failed.
    #[error("cannot request {requested} capture buffers")]
    BufferRequestFailed {
        /// Requested count.
        requested: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The driver granted a different number of buffers.
    #[error("requested {requested} capture buffers, driver granted {granted}")]
    BufferCountMismatch {
        /// Requested count.
        requested: u32,
        /// Granted count.
        granted: u32,
    },

    /// `VIDIOC_QUERYBUF` failed.
    #[error("cannot query capture buffer {index}")]
    BufferQueryFailed {
        /// Buffer index.
        index: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Mapping a buffer into memory failed.
    #[error("cannot map capture buffer {index}")]
    MappingFailed {
        /// Buffer index.
        index: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Unmapping a buffer failed during teardown.
    #[error("cannot unmap capture buffer {index}")]
    UnmapFailed {
        /// Buffer index.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `VIDIOC_QBUF` failed.
    #[error("cannot enqueue capture buffer {index}")]
    EnqueueFailed {
        /// Buffer index.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// `VIDIOC_DQBUF` failed.
    #[error("cannot dequeue capture buffer")]
    DequeueFailed(#[source] io::Error),

    /// The slot index is not part of the pool.
    #[error("buffer index {index} exceeds pool of {count}")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Mapped slot count.
        count: usize,
    },

    /// The slot is owned by the driver.
    #[error("capture buffer {0} is already enqueued")]
    SlotBusy(usize),
}

/// Readiness wait failure.
#[derive(Debug, Error)]
#[error("waiting for capture data failed")]
pub struct WaitError(#[source] pub io::Error);

/// Pixel conversion failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// The destination image has the wrong kind.
    #[error("destination image is {found:?}, expected {expected:?}")]
    WrongImageKind {
        /// Required kind.
        expected: ImageKind,
        /// Actual kind.
        found: ImageKind,
    },

    /// Geometry or offset parameters are invalid.
    #[error("invalid conversion parameter: {0}")]
    InvalidParameter(&'static str),

    /// The raw buffer is shorter than the geometry requires.
    #[error("raw buffer holds {available} bytes, {needed} required")]
    SourceTooShort {
        /// Bytes the conversion reads.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The pixel encoding has no converter.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(FourCC),
}

/// Sink failures.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to a stream or file failed.
    #[error("{sink} output failed")]
    Io {
        /// Sink name.
        sink: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The image does not match what the sink was attached for.
    #[error("{sink} expects a {expected:?} image, got {found:?}")]
    ImageMismatch {
        /// Sink name.
        sink: &'static str,
        /// Kind the sink was set up for.
        expected: ImageKind,
        /// Kind received.
        found: ImageKind,
    },

    /// The framebuffer uses a pixel depth this sink cannot write.
    #[error("framebuffer depth of {0} bits per pixel is not supported")]
    UnsupportedDepth(u32),
}

impl SinkError {
    /// Wrap an I/O error for the named sink.
    pub fn io(sink: &'static str, source: io::Error) -> Self {
        Self::Io { sink, source }
    }
}

/// Capture loop failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Session level failure (streaming, buffer queue).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The readiness wait failed.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// No frame arrived within the configured window.
    #[error("no capture data within {0:?}")]
    Timeout(Duration),

    /// Converting a frame failed.
    #[error("cannot convert frame {frame}")]
    Convert {
        /// Frame number.
        frame: u64,
        /// Conversion failure.
        #[source]
        source: ConvertError,
    },

    /// A sink rejected a frame.
    #[error("cannot deliver frame {frame} to {sink}")]
    Sink {
        /// Frame number.
        frame: u64,
        /// Sink that failed.
        sink: SinkKind,
        /// Sink failure.
        #[source]
        source: SinkError,
    },
}

/// Frame content check failures.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The sampled pixel lies outside the image.
    #[error("pixel ({x}, {y}) is outside the image")]
    PixelOutOfBounds {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// Luminance dropped along a row expected to brighten.
    #[error("gradient not increasing at x={x}: luminance {luminance} < previous {previous}")]
    NotIncreasing {
        /// Column of the drop.
        x: u32,
        /// Luminance at `x`.
        luminance: f32,
        /// Luminance of the previous sample.
        previous: f32,
    },

    /// The gradient spans too small a luminance range.
    #[error("insufficient luminance change for gradient: {0} (expected at least 50.0)")]
    InsufficientRange(f32),

    /// A pixel differs from the expected color.
    #[error("pixel ({x}, {y}) is RGB{actual:?}, expected RGB{expected:?}")]
    ColorMismatch {
        /// Column.
        x: u32,
        /// Row.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Sampled color.
        actual: (u8, u8, u8),
    },

    /// No frames to check.
    #[error("cannot validate an empty frame sequence")]
    EmptySequence,

    /// Sequence numbers are not consecutive.
    #[error("frame sequence gap at index {index}: expected {expected}, got {found}")]
    SequenceGap {
        /// Position in the checked slice.
        index: usize,
        /// Expected sequence number.
        expected: u32,
        /// Actual sequence number.
        found: u32,
    },
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
