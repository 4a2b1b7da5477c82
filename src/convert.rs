//! Raw capture buffer to [`Image`] conversion.
//!
//! The MIPI RAW10 line format packs four samples into five bytes:
//!
//! ```text
//! X0[9:2] X1[9:2] X2[9:2] X3[9:2] (X3[1:0] X2[1:0] X1[1:0] X0[1:0])
//! ```
//!
//! Conversion to 8 bits keeps the four most-significant bytes of each group
//! and skips the fifth. Cropped regions do not necessarily begin on a group
//! boundary, so the general path tracks how many samples of the current group
//! were already consumed (the *track offset*, 0 to 3).
//!
//! Every output row depends only on its source row, so the row loops below
//! can be split across threads without synchronization.

use crate::debayer::debayer;
use crate::error::ConvertError;
use crate::image::{Image, ImageKind, Planes};

/// Samples per RAW10 group.
const GROUP_SAMPLES: usize = 4;
/// Bytes per RAW10 group.
const GROUP_BYTES: usize = 5;

/// Geometry of a region inside a raw capture buffer.
///
/// `pitch` is measured in pixels; `padding` is the number of extra bytes the
/// driver appends to each row beyond the pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayout {
    /// Left edge of the region, in pixels.
    pub x0: u32,
    /// Top edge of the region, in rows.
    pub y0: u32,
    /// Width of the source rows, in pixels.
    pub width: u32,
    /// Number of source rows.
    pub height: u32,
    /// Row length in pixels. Must not be smaller than `width`.
    pub pitch: u32,
    /// Padding bytes after each row.
    pub padding: u32,
}

impl RawLayout {
    /// Full-frame layout without crop.
    #[must_use]
    pub const fn full(width: u32, height: u32, padding: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            width,
            height,
            pitch: width,
            padding,
        }
    }

    /// Restrict the layout to a region starting at `(x0, y0)`.
    #[must_use]
    pub const fn with_origin(mut self, x0: u32, y0: u32) -> Self {
        self.x0 = x0;
        self.y0 = y0;
        self
    }

    pub(crate) const fn validate(&self) -> Result<(), ConvertError> {
        if self.width > self.pitch {
            return Err(ConvertError::InvalidParameter("row width exceeds pitch"));
        }
        if self.x0 >= self.width || self.y0 >= self.height {
            return Err(ConvertError::InvalidParameter("crop origin out of bounds"));
        }
        Ok(())
    }

    /// Byte distance between rows of an 8-bit buffer.
    const fn grey_stride(&self) -> usize {
        self.pitch as usize + self.padding as usize
    }
}

pub(crate) fn require_kind(image: &Image, expected: ImageKind) -> Result<(), ConvertError> {
    let found = image.kind();
    if found == expected {
        Ok(())
    } else {
        Err(ConvertError::WrongImageKind { expected, found })
    }
}

pub(crate) fn row<'a>(data: &'a [u8], start: usize, len: usize) -> Result<&'a [u8], ConvertError> {
    data.get(start..start + len)
        .ok_or(ConvertError::SourceTooShort {
            needed: start + len,
            available: data.len(),
        })
}

/// Copy an 8-bit grey region into a grey image.
pub fn copy_grey(out: &mut Image, src: &[u8], layout: &RawLayout) -> Result<(), ConvertError> {
    require_kind(out, ImageKind::Grey)?;
    layout.validate()?;

    let dx = out.width().min(layout.width - layout.x0) as usize;
    let dy = out.height().min(layout.height - layout.y0) as usize;
    let pitch = out.pitch();
    let stride = layout.grey_stride();
    let Planes::Grey(plane) = out.planes_mut() else {
        return Ok(());
    };
    if dx == 0 {
        return Ok(());
    }

    for (y, out_row) in plane.chunks_exact_mut(pitch).take(dy).enumerate() {
        let start = layout.x0 as usize + (y + layout.y0 as usize) * stride;
        let input = row(src, start, dx)?;
        if let Some(dst) = out_row.get_mut(..dx) {
            dst.copy_from_slice(input);
        }
    }
    Ok(())
}

/// Unpack a RAW10 region into an 8-bit grey image, discarding the two least
/// significant bits of every sample.
///
/// `track_offset` gives the position of the first byte of `src` within its
/// four-sample group.
pub fn unpack_raw10(
    out: &mut Image,
    src: &[u8],
    track_offset: u8,
    layout: &RawLayout,
) -> Result<(), ConvertError> {
    require_kind(out, ImageKind::Grey)?;
    layout.validate()?;
    if usize::from(track_offset) >= GROUP_SAMPLES {
        return Err(ConvertError::InvalidParameter("track offset exceeds 3"));
    }

    let dx = out.width().min(layout.width - layout.x0) as usize;
    let pitch = out.pitch();
    let out_rows = out.height() as usize;
    let Planes::Grey(plane) = out.planes_mut() else {
        return Ok(());
    };
    if dx == 0 {
        return Ok(());
    }

    if track_offset == 0 && layout.x0 == 0 && layout.y0 == 0 {
        let stride = layout.pitch as usize * GROUP_BYTES / GROUP_SAMPLES + layout.padding as usize;
        let dy = out_rows.min(layout.height as usize);
        for (y, out_row) in plane.chunks_exact_mut(pitch).take(dy).enumerate() {
            let input = src.get(y * stride..).unwrap_or_default();
            unpack_row(input, 0, out_row.get_mut(..dx).unwrap_or_default())
                .map_err(|err| rebase_short(err, y * stride, src.len()))?;
        }
        return Ok(());
    }

    let starts = row_starts(track_offset, layout);
    let mut out_rows_iter = plane.chunks_exact_mut(pitch);
    for &(pos, track) in starts.iter().skip(layout.y0 as usize).take(out_rows) {
        let Some(out_row) = out_rows_iter.next() else {
            break;
        };
        let input = src.get(pos..).unwrap_or_default();
        unpack_row(input, track, out_row.get_mut(..dx).unwrap_or_default())
            .map_err(|err| rebase_short(err, pos, src.len()))?;
    }
    Ok(())
}

/// Unpack a full RAW10 Bayer frame and demosaic it into an RGB image.
pub fn unpack_raw10_debayer(
    out: &mut Image,
    src: &[u8],
    track_offset: u8,
    layout: &RawLayout,
) -> Result<(), ConvertError> {
    require_kind(out, ImageKind::Rgb)?;

    let mut mosaic = Image::new(ImageKind::Grey, layout.width, layout.height);
    unpack_raw10(&mut mosaic, src, track_offset, layout)?;

    let Planes::Grey(samples) = mosaic.planes() else {
        return Ok(());
    };
    debayer(
        out,
        samples,
        &RawLayout::full(mosaic.width(), mosaic.height(), 0),
    )
}

/// Byte position and track offset of the cropped start of every source row.
///
/// Advancing by `n` samples from track offset `t` crosses `(t + n) / 4`
/// low-bit bytes and leaves the track offset at `(t + n) % 4`.
fn row_starts(track_offset: u8, layout: &RawLayout) -> Vec<(usize, u8)> {
    let advance = |pos: &mut usize, track: &mut usize, samples: usize| {
        *pos += samples + (*track + samples) / GROUP_SAMPLES;
        *track = (*track + samples) % GROUP_SAMPLES;
    };

    let x0 = layout.x0 as usize;
    let rest = (layout.pitch - layout.x0) as usize;
    let mut pos = 0;
    let mut track = usize::from(track_offset);
    let mut starts = Vec::with_capacity(layout.height as usize);
    for _ in 0..layout.height {
        advance(&mut pos, &mut track, x0);
        #[allow(clippy::cast_possible_truncation)]
        starts.push((pos, track as u8));
        advance(&mut pos, &mut track, rest);
        pos += layout.padding as usize;
    }
    starts
}

/// Unpack `out.len()` samples starting `track` samples into a group.
fn unpack_row(src: &[u8], track: u8, out: &mut [u8]) -> Result<(), ConvertError> {
    // Finish the partially consumed group, then skip its low-bit byte.
    let lead = if track == 0 {
        0
    } else {
        (GROUP_SAMPLES - usize::from(track)).min(out.len())
    };
    let (head, body) = out.split_at_mut(lead);
    head.copy_from_slice(row(src, 0, lead)?);
    if body.is_empty() {
        return Ok(());
    }

    let body_start = if lead == 0 { 0 } else { lead + 1 };
    let needed = body_start + body.len() + (body.len() - 1) / GROUP_SAMPLES;
    let Some(groups) = src.get(body_start..needed) else {
        return Err(ConvertError::SourceTooShort {
            needed,
            available: src.len(),
        });
    };

    for (dst, group) in body
        .chunks_mut(GROUP_SAMPLES)
        .zip(groups.chunks(GROUP_BYTES))
    {
        if let Some(msb) = group.get(..dst.len()) {
            dst.copy_from_slice(msb);
        }
    }
    Ok(())
}

fn rebase_short(err: ConvertError, offset: usize, total: usize) -> ConvertError {
    match err {
        ConvertError::SourceTooShort { needed, .. } => ConvertError::SourceTooShort {
            needed: offset + needed,
            available: total,
        },
        other => other,
    }
}
