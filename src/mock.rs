//! Mock device implementation for testing without hardware.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::traits::{
    BufferInfo, CaptureDevice, DequeuedBuffer, DeviceCapabilities, Format, FourCC,
    V4L2_CID_EXPOSURE, V4L2_CID_GAIN,
};

/// Device path accepted by [`MockDevice::open`].
pub const VALID_DEVICE: &str = "valid-device";

/// One recorded device interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Buffer mapped.
    Map(u32),
    /// Buffer unmapped.
    Unmap(u32),
    /// Buffer queued.
    Queue(u32),
    /// Buffer dequeued.
    Dequeue(u32),
    /// Streaming started.
    StreamOn,
    /// Streaming stopped.
    StreamOff,
    /// Control written.
    SetControl(u32, i32),
    /// Handle closed.
    Close,
}

/// Shared, scriptable state behind a [`MockDevice`].
#[derive(Debug)]
pub struct MockState {
    /// Recorded interactions, oldest first.
    pub events: Vec<Event>,
    /// Reported capabilities.
    pub capabilities: DeviceCapabilities,
    /// Current format.
    pub format: Format,
    /// Buffer count granted instead of the requested one.
    pub granted: Option<u32>,
    /// Fail buffer request.
    pub fail_request: bool,
    /// Fail mapping the buffer with this index.
    pub fail_map_at: Option<u32>,
    /// Fail unmapping the buffer with this index.
    pub fail_unmap_at: Option<u32>,
    /// Fail every dequeue with an I/O error.
    pub fail_dequeue: bool,
    /// Fail starting the stream.
    pub fail_stream_on: bool,
    /// Report this index from the next dequeue.
    pub foreign_index: Option<u32>,
    /// Fail polling with a hard error.
    pub fail_poll: bool,
    /// Number of polls interrupted by a signal before succeeding.
    pub interrupts: u32,
    /// Number of polls that report no data as if their clamped timeout
    /// had run out.
    pub early_expiries: u32,
    /// Frames the device will still deliver.
    pub frame_budget: u32,
    /// Byte value of mapped buffer memory.
    pub fill: u8,
    /// Known controls and their values.
    pub controls: HashMap<u32, i32>,
    /// Accepted control value range, inclusive.
    pub control_range: (i32, i32),
    /// Buffers owned by the driver, waiting for data.
    pub queued: VecDeque<u32>,
    /// Buffers filled and ready to dequeue.
    pub ready: VecDeque<u32>,
    /// Next sequence number.
    pub sequence: u32,
    /// Streaming state.
    pub streaming: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock MIPI Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(640, 480, FourCC::GREY),
            granted: None,
            fail_request: false,
            fail_map_at: None,
            fail_unmap_at: None,
            fail_dequeue: false,
            fail_stream_on: false,
            foreign_index: None,
            fail_poll: false,
            interrupts: 0,
            early_expiries: 0,
            frame_budget: 0,
            fill: 0,
            controls: HashMap::from([(V4L2_CID_GAIN, 0), (V4L2_CID_EXPOSURE, 100)]),
            control_range: (0, 100_000),
            queued: VecDeque::new(),
            ready: VecDeque::new(),
            sequence: 0,
            streaming: false,
        }
    }
}

/// Mock device for testing without hardware.
///
/// Clones of the state handle stay valid after the device has been moved
/// into a session, so tests can script failures and inspect events.
#[derive(Debug, Default)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
}

/// Memory handed out by [`MockDevice::map_buffer`].
#[derive(Debug)]
pub struct MockMapping {
    index: u32,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MockMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl MockDevice {
    /// Create a new mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the format for this mock device.
    #[must_use]
    pub fn with_format(self, format: Format) -> Self {
        self.state.borrow_mut().format = format;
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(self, capabilities: DeviceCapabilities) -> Self {
        self.state.borrow_mut().capabilities = capabilities;
        self
    }

    /// Shared state handle.
    #[must_use]
    pub fn state(&self) -> Rc<RefCell<MockState>> {
        Rc::clone(&self.state)
    }

    /// Second handle on the same state, for inspecting a device that has
    /// been moved into a session.
    #[must_use]
    pub fn observer(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Fill up to `frames` queued buffers immediately.
    pub fn produce(&self, frames: u32) {
        let mut state = self.state.borrow_mut();
        for _ in 0..frames {
            let Some(index) = state.queued.pop_front() else {
                break;
            };
            state.ready.push_back(index);
        }
    }
}

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl CaptureDevice for MockDevice {
    type Mapping = MockMapping;

    fn open(path: &Path) -> io::Result<Self> {
        if path == Path::new(VALID_DEVICE) {
            Ok(Self::new())
        } else {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn capabilities(&self) -> io::Result<DeviceCapabilities> {
        Ok(self.state.borrow().capabilities.clone())
    }

    fn format(&self) -> io::Result<Format> {
        Ok(self.state.borrow().format.clone())
    }

    fn request_format(&mut self, fourcc: FourCC) -> io::Result<Format> {
        let mut state = self.state.borrow_mut();
        let current = &state.format;
        let format = Format::new(current.width, current.height, fourcc);
        state.format = format.clone();
        Ok(format)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let state = self.state.borrow();
        if state.fail_request {
            return Err(os_error(libc::ENOMEM));
        }
        Ok(state.granted.unwrap_or(count))
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let length = self.state.borrow().format.size;
        Ok(BufferInfo {
            index,
            length,
            offset: index * length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MockMapping> {
        let mut state = self.state.borrow_mut();
        if state.fail_map_at == Some(info.index) {
            return Err(os_error(libc::ENOMEM));
        }
        state.events.push(Event::Map(info.index));
        Ok(MockMapping {
            index: info.index,
            data: vec![state.fill; info.length as usize],
        })
    }

    fn unmap_buffer(&mut self, mapping: MockMapping) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::Unmap(mapping.index));
        if state.fail_unmap_at == Some(mapping.index) {
            return Err(os_error(libc::EINVAL));
        }
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::Queue(index));
        state.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut state = self.state.borrow_mut();
        if state.fail_dequeue {
            return Err(os_error(libc::EIO));
        }
        let index = match state.foreign_index.take() {
            Some(index) => index,
            None => state
                .ready
                .pop_front()
                .ok_or_else(|| os_error(libc::EAGAIN))?,
        };
        state.events.push(Event::Dequeue(index));
        let sequence = state.sequence;
        state.sequence += 1;
        Ok(DequeuedBuffer {
            index,
            bytes_used: state.format.size,
            sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_stream_on {
            return Err(os_error(libc::EIO));
        }
        state.events.push(Event::StreamOn);
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(Event::StreamOff);
        state.streaming = false;
        // The driver reclaims every buffer.
        state.queued.clear();
        state.ready.clear();
        Ok(())
    }

    fn control(&self, id: u32) -> io::Result<i32> {
        self.state
            .borrow()
            .controls
            .get(&id)
            .copied()
            .ok_or_else(|| os_error(libc::EINVAL))
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let (min, max) = state.control_range;
        if !state.controls.contains_key(&id) {
            return Err(os_error(libc::EINVAL));
        }
        if value < min || value > max {
            return Err(os_error(libc::ERANGE));
        }
        state.events.push(Event::SetControl(id, value));
        state.controls.insert(id, value);
        Ok(())
    }

    fn poll_readable(&self, _timeout: Duration) -> io::Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.interrupts > 0 {
            state.interrupts -= 1;
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }
        if state.fail_poll {
            return Err(os_error(libc::EBADF));
        }
        if state.early_expiries > 0 {
            state.early_expiries -= 1;
            return Ok(false);
        }
        if !state.ready.is_empty() {
            return Ok(true);
        }
        if state.streaming && state.frame_budget > 0 {
            if let Some(index) = state.queued.pop_front() {
                state.frame_budget -= 1;
                state.ready.push_back(index);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn close(self) -> io::Result<()> {
        self.state.borrow_mut().events.push(Event::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_open() {
        let device = MockDevice::open(Path::new(VALID_DEVICE)).expect("open should succeed");
        let caps = device.capabilities().expect("capabilities should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);

        let err = MockDevice::open(Path::new("/dev/missing")).expect_err("open should fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_mock_device_format() {
        let mut device = MockDevice::new();
        let format = device.format().expect("format should succeed");
        assert_eq!(format.width, 640);
        assert_eq!(format.height, 480);

        let requested = device
            .request_format(FourCC::Y10P)
            .expect("request_format should succeed");
        assert_eq!(requested.fourcc, FourCC::Y10P);
        assert_eq!(requested.stride, 800);
    }

    #[test]
    fn test_mock_delivers_frame_budget_while_streaming() {
        let mut device = MockDevice::new();
        device.state().borrow_mut().frame_budget = 1;
        device.queue_buffer(0).expect("queue should succeed");

        assert!(!device
            .poll_readable(Duration::ZERO)
            .expect("poll should succeed"));

        device.stream_on().expect("stream_on should succeed");
        assert!(device
            .poll_readable(Duration::ZERO)
            .expect("poll should succeed"));
        let buffer = device.dequeue_buffer().expect("dequeue should succeed");
        assert_eq!(buffer.index, 0);
        assert_eq!(buffer.sequence, 0);

        let err = device.dequeue_buffer().expect_err("nothing left");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_mock_control_errors() {
        let mut device = MockDevice::new();
        let unknown = device.set_control(0x1234, 1).expect_err("unknown id");
        assert_eq!(unknown.raw_os_error(), Some(libc::EINVAL));

        let range = device
            .set_control(V4L2_CID_GAIN, -1)
            .expect_err("out of range");
        assert_eq!(range.raw_os_error(), Some(libc::ERANGE));
    }
}
