//! Normalized planar 8-bit images produced by the pixel converter.

/// Image layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// One 8-bit plane.
    Grey,
    /// Three 8-bit planes: red, green, blue.
    Rgb,
}

/// Sample storage for an [`Image`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Planes {
    /// Single luminance plane.
    Grey(Vec<u8>),
    /// Separate color planes.
    Rgb {
        /// Red plane.
        r: Vec<u8>,
        /// Green plane.
        g: Vec<u8>,
        /// Blue plane.
        b: Vec<u8>,
    },
}

/// An owned, row-major planar image without inter-row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    planes: Planes,
}

impl Image {
    /// Allocate a zeroed image.
    #[must_use]
    pub fn new(kind: ImageKind, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        let planes = match kind {
            ImageKind::Grey => Planes::Grey(vec![0; len]),
            ImageKind::Rgb => Planes::Rgb {
                r: vec![0; len],
                g: vec![0; len],
                b: vec![0; len],
            },
        };
        Self {
            width,
            height,
            planes,
        }
    }

    /// Wrap an existing grey plane. Returns `None` if the length does not
    /// match the dimensions.
    #[must_use]
    pub fn from_grey(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            planes: Planes::Grey(data),
        })
    }

    /// Image layout.
    #[must_use]
    pub const fn kind(&self) -> ImageKind {
        match self.planes {
            Planes::Grey(_) => ImageKind::Grey,
            Planes::Rgb { .. } => ImageKind::Rgb,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes. Always equal to the width.
    #[must_use]
    pub const fn pitch(&self) -> usize {
        self.width as usize
    }

    /// Sample storage.
    #[must_use]
    pub const fn planes(&self) -> &Planes {
        &self.planes
    }

    /// Mutable sample storage.
    pub fn planes_mut(&mut self) -> &mut Planes {
        &mut self.planes
    }

    /// The first plane: luminance for grey images, red for RGB.
    #[must_use]
    pub fn plane0(&self) -> &[u8] {
        match &self.planes {
            Planes::Grey(data) => data,
            Planes::Rgb { r, .. } => r,
        }
    }

    /// Red, green and blue planes. Grey images return their single plane
    /// three times.
    #[must_use]
    pub fn channels(&self) -> [&[u8]; 3] {
        match &self.planes {
            Planes::Grey(data) => [data, data, data],
            Planes::Rgb { r, g, b } => [r, g, b],
        }
    }

    /// Copy the overlapping rectangle of `other` into this image.
    ///
    /// Both images must have the same kind.
    pub fn copy_from(&mut self, other: &Self) -> Result<(), (ImageKind, ImageKind)> {
        let mismatch = (self.kind(), other.kind());
        let dx = self.width.min(other.width) as usize;
        let dst_pitch = self.pitch();
        let src_pitch = other.pitch();

        let copy_plane = |dst: &mut [u8], src: &[u8]| {
            if dx == 0 {
                return;
            }
            for (dst_row, src_row) in dst
                .chunks_exact_mut(dst_pitch)
                .zip(src.chunks_exact(src_pitch))
            {
                if let (Some(d), Some(s)) = (dst_row.get_mut(..dx), src_row.get(..dx)) {
                    d.copy_from_slice(s);
                }
            }
        };

        match (&mut self.planes, &other.planes) {
            (Planes::Grey(dst), Planes::Grey(src)) => copy_plane(dst, src),
            (
                Planes::Rgb { r, g, b },
                Planes::Rgb {
                    r: src_r,
                    g: src_g,
                    b: src_b,
                },
            ) => {
                copy_plane(r, src_r);
                copy_plane(g, src_g);
                copy_plane(b, src_b);
            }
            _ => return Err(mismatch),
        }
        Ok(())
    }
}
