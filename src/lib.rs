//! mipi-capture: A V4L2 capture pipeline for MIPI camera sensors
//!
//! This library opens a memory-mapped streaming session on a V4L2 device,
//! converts packed 10-bit grey and Bayer frames into 8-bit images, and hands
//! them to console, file, framebuffer and network sinks. Device access goes
//! through the [`CaptureDevice`] trait so the whole pipeline can be tested
//! against a mock device.

pub mod capture;
pub mod cli;
pub mod convert;
pub mod debayer;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod image;
pub mod pool;
pub mod session;
pub mod sinks;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capture::CaptureLoop;
pub use device::V4L2Device;
pub use dispatch::{convert_frame, Dispatcher};
pub use error::{
    CaptureError, ConvertError, PoolError, SessionError, SinkError, ValidationError, WaitError,
};
pub use image::{Image, ImageKind};
pub use session::{Readiness, Session, SessionOptions};
pub use traits::{CaptureDevice, ControlKind, DeviceCapabilities, Format, FourCC};
