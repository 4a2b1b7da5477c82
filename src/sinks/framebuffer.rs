//! Preview on a Linux framebuffer device (`/dev/fbN`).

#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;

use tracing::info;

use super::{FrameSink, SinkKind};
use crate::error::SinkError;
use crate::image::Image;

const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;

/// The only pixel depth written by this sink.
const BITS_PER_PIXEL: u32 = 32;
const BYTES_PER_PIXEL: usize = 4;

#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

/// `struct fb_var_screeninfo`
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FbVarScreeninfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

/// `struct fb_fix_screeninfo`
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct FbFixScreeninfo {
    id: [u8; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

/// Visible area and memory layout of a 32-bit framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FbGeometry {
    /// Visible width in pixels.
    pub xres: u32,
    /// Visible height in pixels.
    pub yres: u32,
    /// Horizontal panning offset in pixels.
    pub xoffset: u32,
    /// Vertical panning offset in rows.
    pub yoffset: u32,
    /// Bytes per framebuffer row.
    pub line_length: u32,
}

/// Write `image` into framebuffer memory as `0x00RRGGBB` pixels.
///
/// Large images are reduced by an integer factor
/// `max(1, min(pitch / xres, height / yres))` by nearest sampling. Writes
/// that would fall outside `fb` are skipped.
pub fn blit(fb: &mut [u8], geometry: &FbGeometry, image: &Image) {
    let pitch = image.pitch();
    let height = image.height() as usize;
    let xres = (geometry.xres as usize).max(1);
    let yres = (geometry.yres as usize).max(1);
    if pitch == 0 || height == 0 {
        return;
    }

    let scaler = (pitch / xres).min(height / yres).max(1);
    let rows = yres.min(height.div_ceil(scaler));
    let cols = xres.min(pitch.div_ceil(scaler));
    let line_length = geometry.line_length as usize;
    let x_start = geometry.xoffset as usize * BYTES_PER_PIXEL;
    let [r, g, b] = image.channels();

    for y in 0..rows {
        let src_row = scaler * y * pitch;
        let dst_row = (y + geometry.yoffset as usize) * line_length + x_start;
        for x in 0..cols {
            let src = src_row + scaler * x;
            let (Some(&red), Some(&green), Some(&blue)) = (r.get(src), g.get(src), b.get(src))
            else {
                continue;
            };
            let pixel = (u32::from(red) << 16) | (u32::from(green) << 8) | u32::from(blue);
            let dst = dst_row + x * BYTES_PER_PIXEL;
            if let Some(out) = fb.get_mut(dst..dst + BYTES_PER_PIXEL) {
                out.copy_from_slice(&pixel.to_ne_bytes());
            }
        }
    }
}

/// Shared mapping of framebuffer memory, unmapped on drop.
#[derive(Debug)]
struct FbMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl FbMapping {
    fn new(file: &File, len: usize) -> io::Result<Self> {
        // SAFETY: mapping a device file we hold open; the kernel validates
        // the length against the framebuffer memory.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;
        Ok(Self { ptr, len })
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `ptr` points to `len` mapped, writable bytes that live
        // until drop; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for FbMapping {
    fn drop(&mut self) {
        // SAFETY: unmapping the region created in `FbMapping::new`.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

fn read_info<T: Default>(file: &File, request: libc::c_ulong) -> io::Result<T> {
    let mut info = T::default();
    // SAFETY: `T` is the repr(C) structure the request fills in.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, &mut info as *mut T) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(info)
}

/// Draws frames on a 32 bits-per-pixel framebuffer.
#[derive(Debug)]
pub struct FramebufferSink {
    map: FbMapping,
    geometry: FbGeometry,
    // Keeps the descriptor open for the lifetime of the mapping.
    _file: File,
}

impl FramebufferSink {
    /// Open and map the framebuffer device at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| SinkError::io("framebuffer", err))?;

        let var: FbVarScreeninfo = read_info(&file, FBIOGET_VSCREENINFO)
            .map_err(|err| SinkError::io("framebuffer", err))?;
        let fix: FbFixScreeninfo = read_info(&file, FBIOGET_FSCREENINFO)
            .map_err(|err| SinkError::io("framebuffer", err))?;
        if var.bits_per_pixel != BITS_PER_PIXEL {
            return Err(SinkError::UnsupportedDepth(var.bits_per_pixel));
        }

        let geometry = FbGeometry {
            xres: var.xres,
            yres: var.yres,
            xoffset: var.xoffset,
            yoffset: var.yoffset,
            line_length: fix.line_length,
        };
        let len = if fix.smem_len > 0 {
            fix.smem_len as usize
        } else {
            (var.yoffset + var.yres) as usize * fix.line_length as usize
        };
        let map = FbMapping::new(&file, len).map_err(|err| SinkError::io("framebuffer", err))?;
        info!(
            path = %path.display(),
            xres = geometry.xres,
            yres = geometry.yres,
            line_length = geometry.line_length,
            "framebuffer attached"
        );

        Ok(Self {
            map,
            geometry,
            _file: file,
        })
    }

    /// Visible geometry.
    pub const fn geometry(&self) -> &FbGeometry {
        &self.geometry
    }
}

impl FrameSink for FramebufferSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Framebuffer
    }

    fn consume(&mut self, image: &Image, _frame: u64) -> Result<(), SinkError> {
        blit(self.map.as_mut_slice(), &self.geometry, image);
        Ok(())
    }
}
