//! Core traits and types for the V4L2 capture abstraction.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Pixel format representation (e.g., GREY, Y10, pRAA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// 10-bit greyscale, MIPI packed (4 MSB bytes followed by one LSB byte).
    pub const Y10P: Self = Self::new(b"Y10 ");
    /// 10-bit Bayer RGGB, MIPI packed.
    pub const SRGGB10P: Self = Self::new(b"pRAA");

    /// Little-endian 32-bit code as used by the kernel.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Bits per sample on the wire.
    #[must_use]
    pub const fn bits_per_sample(self) -> u32 {
        match self.0 {
            [b'Y', b'1', b'0', b' '] | [b'p', b'R', b'A', b'A'] => 10,
            _ => 8,
        }
    }

    /// Bytes needed for `width` pixels of this format, without row padding.
    #[must_use]
    pub const fn packed_line_bytes(self, width: u32) -> u32 {
        (width * self.bits_per_sample()).div_ceil(8)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        write!(f, " (0x{:08x})", self.code())
    }
}

impl std::str::FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(format!("expected 1 to 4 ASCII characters, got {s:?}"));
        }
        // Short codes such as "Y10" are space padded like the kernel headers.
        let mut code = [b' '; 4];
        for (dst, src) in code.iter_mut().zip(bytes) {
            *dst = *src;
        }
        Ok(Self(code))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Negotiated capture geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride), including driver padding.
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification with unpadded rows.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let stride = fourcc.packed_line_bytes(width);
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Bytes between the end of a row's sample data and the next row.
    ///
    /// The sample data is counted in whole bytes, rounded down, so that
    /// adding it back to a packed row length gives the stride again. A
    /// trailing low-bit byte of a partial RAW10 group counts as padding.
    #[must_use]
    pub const fn padding_bytes(&self) -> u32 {
        self.stride
            .saturating_sub(self.width * self.fourcc.bits_per_sample() / 8)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming I/O.
    pub can_stream: bool,
}

/// Length and mmap offset of one driver buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Buffer index as known to the driver.
    pub index: u32,
    /// Length of the buffer in bytes.
    pub length: u32,
    /// Offset to pass to `mmap`.
    pub offset: u32,
}

/// A buffer handed back by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Index of the filled buffer.
    pub index: u32,
    /// Bytes of payload the driver wrote.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
}

/// Integer sensor controls this crate adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Analog gain.
    Gain,
    /// Exposure (shutter) time.
    Exposure,
}

impl ControlKind {
    /// V4L2 control identifier.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Gain => V4L2_CID_GAIN,
            Self::Exposure => V4L2_CID_EXPOSURE,
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gain => write!(f, "gain"),
            Self::Exposure => write!(f, "exposure"),
        }
    }
}

const V4L2_CID_BASE: u32 = 0x0098_0900;
/// `V4L2_CID_EXPOSURE`
pub const V4L2_CID_EXPOSURE: u32 = V4L2_CID_BASE + 17;
/// `V4L2_CID_GAIN`
pub const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 19;

/// Abstraction over the V4L2 streaming protocol.
///
/// Every method maps onto one ioctl (or `mmap`/`munmap`/`poll`) so that the
/// session and buffer pool logic can be exercised against a mock device.
/// Errors are returned as raw `io::Error`s; classification happens in the
/// session and pool layers, which know what operation was being attempted.
pub trait CaptureDevice {
    /// A mapped driver buffer.
    type Mapping: AsRef<[u8]>;

    /// Open the device node for reading and writing.
    fn open(path: &Path) -> io::Result<Self>
    where
        Self: Sized;

    /// `VIDIOC_QUERYCAP`
    fn capabilities(&self) -> io::Result<DeviceCapabilities>;

    /// `VIDIOC_G_FMT`
    fn format(&self) -> io::Result<Format>;

    /// `VIDIOC_S_FMT` with the current geometry and the given encoding.
    fn request_format(&mut self, fourcc: FourCC) -> io::Result<Format>;

    /// `VIDIOC_REQBUFS`; returns the count granted by the driver.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// `VIDIOC_QUERYBUF`
    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo>;

    /// Map a queried buffer into process memory.
    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    /// Release a mapping created by [`CaptureDevice::map_buffer`].
    fn unmap_buffer(&mut self, mapping: Self::Mapping) -> io::Result<()>;

    /// `VIDIOC_QBUF`
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// `VIDIOC_DQBUF`. Fails with [`io::ErrorKind::WouldBlock`] when no
    /// buffer is ready.
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// `VIDIOC_STREAMON`
    fn stream_on(&mut self) -> io::Result<()>;

    /// `VIDIOC_STREAMOFF`
    fn stream_off(&mut self) -> io::Result<()>;

    /// `VIDIOC_G_CTRL`
    fn control(&self, id: u32) -> io::Result<i32>;

    /// `VIDIOC_S_CTRL`
    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()>;

    /// Wait until the device is readable. `Ok(false)` means the timeout
    /// elapsed. Signal interruption surfaces as
    /// [`io::ErrorKind::Interrupted`].
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool>;

    /// Close the device handle.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}
