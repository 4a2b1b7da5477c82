//! Binary PGM/PPM output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FrameSink, SinkKind};
use crate::error::SinkError;
use crate::image::{Image, ImageKind, Planes};

/// Write `image` as binary PNM: `P5` for grey, `P6` with interleaved RGB.
///
/// The header is `P<n> <width> <height> 255 ` followed directly by samples.
pub fn encode_pnm<W: Write>(out: &mut W, image: &Image) -> io::Result<()> {
    let magic = match image.kind() {
        ImageKind::Grey => '5',
        ImageKind::Rgb => '6',
    };
    write!(out, "P{magic} {} {} 255 ", image.width(), image.height())?;

    let width = image.width() as usize;
    let pitch = image.pitch().max(1);
    let rows = image.height() as usize;
    match image.planes() {
        Planes::Grey(plane) => {
            for line in plane.chunks(pitch).take(rows) {
                out.write_all(line.get(..width).unwrap_or(line))?;
            }
        }
        Planes::Rgb { r, g, b } => {
            let mut line = Vec::with_capacity(3 * width);
            let rows_iter = r
                .chunks(pitch)
                .zip(g.chunks(pitch))
                .zip(b.chunks(pitch))
                .take(rows);
            for ((r_row, g_row), b_row) in rows_iter {
                line.clear();
                for ((&red, &green), &blue) in r_row.iter().zip(g_row).zip(b_row).take(width) {
                    line.extend_from_slice(&[red, green, blue]);
                }
                out.write_all(&line)?;
            }
        }
    }
    Ok(())
}

/// File name for `frame`: `img00042.pgm` or `img00042.ppm`.
#[must_use]
pub fn file_name(kind: ImageKind, frame: u64) -> String {
    let extension = match kind {
        ImageKind::Grey => "pgm",
        ImageKind::Rgb => "ppm",
    };
    format!("img{frame:05}.{extension}")
}

/// Writes every frame to its own PNM file.
#[derive(Debug, Clone)]
pub struct PnmSink {
    dir: PathBuf,
}

impl PnmSink {
    /// Write files into `dir`.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the given frame is written to.
    pub fn path_for(&self, kind: ImageKind, frame: u64) -> PathBuf {
        self.dir.join(file_name(kind, frame))
    }
}

impl FrameSink for PnmSink {
    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    fn consume(&mut self, image: &Image, frame: u64) -> Result<(), SinkError> {
        let path = self.path_for(image.kind(), frame);
        let write = || -> io::Result<()> {
            let mut out = BufWriter::new(File::create(&path)?);
            encode_pnm(&mut out, image)?;
            out.flush()
        };
        write().map_err(|err| SinkError::io("file", err))?;
        debug!(path = %path.display(), "wrote frame");
        Ok(())
    }
}
