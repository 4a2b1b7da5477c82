//! V4L2 device implementation.
//!
//! Capabilities and formats go through the v4l device API. Buffer
//! negotiation, queueing and controls use the ioctl bindings the v4l crate
//! exports (`v4l::v4l2` and `v4l::v4l_sys`) directly, so that buffer
//! ownership stays with [`crate::pool::BufferPool`] instead of a v4l stream.

#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::os::fd::{BorrowedFd, RawFd};
use std::os::raw::c_void;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc::{self, _IOC_TYPE};
use v4l::v4l_sys::{v4l2_buffer, v4l2_control, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{BufferInfo, CaptureDevice, DequeuedBuffer, DeviceCapabilities, Format, FourCC};

fn buffer_desc(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        // SAFETY: all-zero is a valid value for this plain C structure.
        ..unsafe { mem::zeroed() }
    }
}

fn requestbuffers_desc(count: u32) -> v4l2_requestbuffers {
    v4l2_requestbuffers {
        count,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        // SAFETY: all-zero is a valid value for this plain C structure.
        ..unsafe { mem::zeroed() }
    }
}

/// Issue `request` on `fd` with `arg` as its argument.
///
/// # Safety
///
/// `T` must be the structure the kernel expects for `request`.
unsafe fn xioctl<T>(fd: RawFd, request: _IOC_TYPE, arg: &mut T) -> io::Result<()> {
    v4l2::ioctl(fd, request, ptr::from_mut(arg).cast::<c_void>())
}

// ===== Device =====

/// Capture buffer memory mapped from the driver.
///
/// Unmapped by [`CaptureDevice::unmap_buffer`], or on drop as a fallback.
#[derive(Debug)]
pub struct V4l2Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl V4l2Mapping {
    fn unmap(&self) -> io::Result<()> {
        // SAFETY: the region was created by `mmap` with exactly this length.
        unsafe { v4l2::munmap(self.ptr.as_ptr().cast(), self.len) }
    }
}

impl AsRef<[u8]> for V4l2Mapping {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: `ptr` points to `len` mapped bytes that stay valid until
        // the mapping is released.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for V4l2Mapping {
    fn drop(&mut self) {
        let _ = self.unmap();
    }
}

/// A V4L2 capture device node.
pub struct V4L2Device {
    device: Device,
    fd: RawFd,
}

impl V4L2Device {
    fn buffer(&self, request: _IOC_TYPE, index: u32) -> io::Result<v4l2_buffer> {
        let mut buf = buffer_desc(index);
        // SAFETY: buffer ioctls take a `struct v4l2_buffer`.
        unsafe { xioctl(self.fd, request, &mut buf)? };
        Ok(buf)
    }

    fn stream(&self, request: _IOC_TYPE) -> io::Result<()> {
        let mut kind = Type::VideoCapture as u32;
        // SAFETY: STREAMON/STREAMOFF take the buffer type as an int.
        unsafe { xioctl(self.fd, request, &mut kind) }
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl CaptureDevice for V4L2Device {
    type Mapping = V4l2Mapping;

    fn open(path: &Path) -> io::Result<Self> {
        let device = Device::with_path(path)?;
        let fd = device.handle().fd();
        Ok(Self { device, fd })
    }

    fn capabilities(&self) -> io::Result<DeviceCapabilities> {
        let caps = self.device.query_caps()?;
        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
        })
    }

    fn format(&self) -> io::Result<Format> {
        let fmt = Capture::format(&self.device)?;
        Ok(to_format(&fmt))
    }

    fn request_format(&mut self, fourcc: FourCC) -> io::Result<Format> {
        let mut fmt = Capture::format(&self.device)?;
        fmt.fourcc = fourcc.into();
        let fmt = Capture::set_format(&self.device, &fmt)?;
        Ok(to_format(&fmt))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req = requestbuffers_desc(count);
        // SAFETY: REQBUFS takes a `struct v4l2_requestbuffers`.
        unsafe { xioctl(self.fd, vidioc::VIDIOC_REQBUFS, &mut req)? };
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let buf = self.buffer(vidioc::VIDIOC_QUERYBUF, index)?;
        Ok(BufferInfo {
            index: buf.index,
            length: buf.length,
            // SAFETY: for MMAP buffers the driver fills in `m.offset`.
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<V4l2Mapping> {
        let len = info.length as usize;
        // SAFETY: length and offset come from VIDIOC_QUERYBUF on this fd.
        #[allow(clippy::cast_possible_wrap)]
        let addr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                info.offset as libc::off_t,
            )?
        };
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;
        Ok(V4l2Mapping { ptr, len })
    }

    fn unmap_buffer(&mut self, mapping: V4l2Mapping) -> io::Result<()> {
        let result = mapping.unmap();
        // Unmapped (or unmappable) either way; skip the drop fallback.
        mem::forget(mapping);
        result
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.buffer(vidioc::VIDIOC_QBUF, index).map(|_| ())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let buf = self.buffer(vidioc::VIDIOC_DQBUF, 0)?;
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream(vidioc::VIDIOC_STREAMON)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream(vidioc::VIDIOC_STREAMOFF)
    }

    fn control(&self, id: u32) -> io::Result<i32> {
        let mut ctrl = v4l2_control { id, value: 0 };
        // SAFETY: G_CTRL takes a `struct v4l2_control`.
        unsafe { xioctl(self.fd, vidioc::VIDIOC_G_CTRL, &mut ctrl)? };
        Ok(ctrl.value)
    }

    fn set_control(&mut self, id: u32, value: i32) -> io::Result<()> {
        let mut ctrl = v4l2_control { id, value };
        // SAFETY: S_CTRL takes a `struct v4l2_control`.
        unsafe { xioctl(self.fd, vidioc::VIDIOC_S_CTRL, &mut ctrl) }
    }

    /// Timeouts above `u16::MAX` milliseconds are clamped.
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        // SAFETY: `self.device` keeps the descriptor open.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        let ready = poll(&mut fds, PollTimeout::from(millis))?;
        Ok(ready > 0)
    }

    fn close(self) -> io::Result<()> {
        // The v4l handle closes the descriptor when dropped.
        drop(self.device);
        Ok(())
    }
}
