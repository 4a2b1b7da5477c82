//! Device session: the open handle, negotiated geometry, sensor controls and
//! the buffer pool.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError, WaitError};
use crate::pool::{BufferPool, Dequeued};
use crate::traits::{CaptureDevice, ControlKind, Format, FourCC};

/// Number of capture buffers requested when nothing else is configured.
pub const DEFAULT_BUFFER_COUNT: u32 = 3;

/// Settings applied while opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Capture buffers to request from the driver.
    pub buffer_count: u32,
    /// Pixel encoding to request before the format is queried.
    pub pixel_format: Option<FourCC>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            pixel_format: None,
        }
    }
}

/// Outcome of [`Session::wait_for_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A buffer can be dequeued.
    Ready,
    /// The timeout elapsed without data.
    Timeout,
}

/// An open capture device with its mapped buffers.
///
/// Dropping the session runs the same teardown as [`Session::close`].
pub struct Session<D: CaptureDevice> {
    device: Option<D>,
    pool: Option<BufferPool<D::Mapping>>,
    format: Format,
    streaming: bool,
}

impl<D: CaptureDevice> Session<D> {
    /// Open the device node at `path` and negotiate format and buffers.
    pub fn open<P: AsRef<Path>>(path: P, options: &SessionOptions) -> Result<Self> {
        let path = path.as_ref();
        let device = D::open(path).map_err(|source| SessionError::DeviceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_device(device, options)
    }

    /// Negotiate format and buffers on an already open device.
    ///
    /// The device is closed again if negotiation fails.
    pub fn from_device(mut device: D, options: &SessionOptions) -> Result<Self> {
        match negotiate(&mut device, options) {
            Ok((format, pool)) => Ok(Self {
                device: Some(device),
                pool: Some(pool),
                format,
                streaming: false,
            }),
            Err(err) => {
                if let Err(close) = device.close() {
                    warn!(error = %close, "cannot close device after failed negotiation");
                }
                Err(err)
            }
        }
    }

    /// Negotiated pixel format and geometry.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Number of mapped capture buffers.
    pub fn buffer_count(&self) -> usize {
        self.pool.as_ref().map_or(0, BufferPool::len)
    }

    /// Whether the device handle is still open.
    pub const fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Whether streaming is switched on.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn parts(&mut self) -> Result<(&mut D, &mut BufferPool<D::Mapping>)> {
        match (self.device.as_mut(), self.pool.as_mut()) {
            (Some(device), Some(pool)) => Ok((device, pool)),
            _ => Err(SessionError::Closed),
        }
    }

    /// Write a sensor control.
    ///
    /// The current and resulting values are only logged; whether the write
    /// itself succeeded decides the result.
    pub fn set_control(&mut self, control: ControlKind, value: i32) -> Result<()> {
        let device = self.device.as_mut().ok_or(SessionError::Closed)?;
        let id = control.id();

        match device.control(id) {
            Ok(current) => debug!(%control, current, "read control"),
            Err(err) => warn!(%control, error = %err, "cannot read control"),
        }

        device
            .set_control(id, value)
            .map_err(|source| classify_control_error(control, value, source))?;

        match device.control(id) {
            Ok(actual) => debug!(%control, requested = value, actual, "control updated"),
            Err(err) => warn!(%control, error = %err, "cannot read back control"),
        }
        Ok(())
    }

    /// Apply gain, then exposure.
    pub fn set_parameters(&mut self, gain: i32, exposure: i32) -> Result<()> {
        self.set_control(ControlKind::Gain, gain)?;
        self.set_control(ControlKind::Exposure, exposure)
    }

    /// `VIDIOC_STREAMON`
    pub fn start_streaming(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(SessionError::Closed)?;
        device
            .stream_on()
            .map_err(|source| SessionError::StreamControlFailed { on: true, source })?;
        self.streaming = true;
        info!("streaming started");
        Ok(())
    }

    /// `VIDIOC_STREAMOFF`
    pub fn stop_streaming(&mut self) -> Result<()> {
        let device = self.device.as_mut().ok_or(SessionError::Closed)?;
        device
            .stream_off()
            .map_err(|source| SessionError::StreamControlFailed { on: false, source })?;
        if let Some(pool) = self.pool.as_mut() {
            pool.reclaim();
        }
        self.streaming = false;
        info!("streaming stopped");
        Ok(())
    }

    /// Hand buffer `index` to the driver.
    pub fn enqueue(&mut self, index: usize) -> Result<()> {
        let (device, pool) = self.parts()?;
        pool.enqueue(device, index)?;
        Ok(())
    }

    /// Hand every buffer to the driver.
    pub fn enqueue_all(&mut self) -> Result<()> {
        for index in 0..self.buffer_count() {
            self.enqueue(index)?;
        }
        Ok(())
    }

    /// Take back a filled buffer, or [`Dequeued::Retry`] if none is ready.
    pub fn dequeue(&mut self) -> Result<Dequeued> {
        let (device, pool) = self.parts()?;
        Ok(pool.dequeue(device)?)
    }

    /// Contents of the filled buffer `index`.
    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        self.pool.as_ref().and_then(|pool| pool.data(index))
    }

    /// Wait until a buffer can be dequeued.
    ///
    /// Signal interruptions and polls that expire before the deadline (the
    /// device clamps a single poll) restart the wait with whatever time is
    /// left.
    pub fn wait_for_data(&self, timeout: Duration) -> std::result::Result<Readiness, WaitError> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| WaitError(io::Error::from_raw_os_error(libc::EBADF)))?;
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match device.poll_readable(remaining) {
                Ok(true) => return Ok(Readiness::Ready),
                Ok(false) if Instant::now() >= deadline => return Ok(Readiness::Timeout),
                Ok(false) => debug!(?remaining, "poll expired before the deadline"),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    debug!(?remaining, "readiness wait interrupted");
                }
                Err(err) => return Err(WaitError(err)),
            }
        }
    }

    /// Stop streaming, unmap every buffer in reverse order and close the
    /// handle.
    ///
    /// Calling this again is a no-op. Unmap failures do not keep the handle
    /// open; the first one is returned.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };

        if std::mem::take(&mut self.streaming) {
            if let Err(err) = device.stream_off() {
                warn!(error = %err, "cannot stop streaming during close");
            }
        }

        let mut first = None;
        if let Some(pool) = self.pool.take() {
            if let Err(err) = pool.release(&mut device) {
                first = Some(SessionError::Pool(err));
            }
        }
        if let Err(source) = device.close() {
            if first.is_none() {
                first = Some(SessionError::CloseFailed(source));
            }
        }
        debug!("capture device closed");

        first.map_or(Ok(()), Err)
    }
}

impl<D: CaptureDevice> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(error = %err, "capture device teardown failed");
        }
    }
}

fn negotiate<D: CaptureDevice>(
    device: &mut D,
    options: &SessionOptions,
) -> Result<(Format, BufferPool<D::Mapping>)> {
    let caps = device
        .capabilities()
        .map_err(|err| SessionError::NotACaptureDevice(Some(err)))?;
    if !caps.can_capture || !caps.can_stream {
        return Err(SessionError::NotACaptureDevice(None));
    }
    debug!(driver = %caps.driver, card = %caps.card, bus = %caps.bus_info, "capture device opened");

    if let Some(fourcc) = options.pixel_format {
        device
            .request_format(fourcc)
            .map_err(|source| SessionError::FormatRequestFailed(fourcc, source))?;
    }

    let format = device.format().map_err(SessionError::FormatQueryFailed)?;
    info!(
        width = format.width,
        height = format.height,
        format = %format.fourcc,
        bytes_per_line = format.stride,
        "capture format"
    );

    let pool = BufferPool::allocate(device, options.buffer_count)?;
    Ok((format, pool))
}

fn classify_control_error(control: ControlKind, value: i32, source: io::Error) -> SessionError {
    match source.raw_os_error() {
        Some(libc::EINVAL) => SessionError::ControlUnsupported { control, source },
        Some(libc::ERANGE) => SessionError::ControlOutOfRange {
            control,
            value,
            source,
        },
        _ => SessionError::ControlIo { control, source },
    }
}
