//! ASCII art preview for terminals.

use std::io::{self, Write};

use super::{FrameSink, SinkKind};
use crate::error::SinkError;
use crate::image::Image;

/// Default sampling distance in pixels.
pub const DEFAULT_STEP: usize = 50;

/// Prints a coarse ASCII rendering of the first plane of every frame.
///
/// From the second frame on the previous rendering is overwritten by moving
/// the cursor up first.
#[derive(Debug)]
pub struct ConsoleSink<W: Write> {
    out: W,
    step: usize,
    first: bool,
}

impl ConsoleSink<io::Stdout> {
    /// Print to standard output.
    #[must_use]
    pub fn stdout(step: usize) -> Self {
        Self::new(io::stdout(), step)
    }
}

impl<W: Write> ConsoleSink<W> {
    /// Print to `out`, sampling every `step` pixels. A step of zero is
    /// treated as one.
    pub fn new(out: W, step: usize) -> Self {
        Self {
            out,
            step: step.max(1),
            first: true,
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for ConsoleSink<W> {
    fn kind(&self) -> SinkKind {
        SinkKind::Console
    }

    fn consume(&mut self, image: &Image, _frame: u64) -> Result<(), SinkError> {
        let text = render(image, self.step, !self.first);
        self.first = false;
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|err| SinkError::io("console", err))
    }
}

const fn glyph(value: u8) -> char {
    match value {
        0..=39 => ' ',
        40..=88 => '-',
        89..=137 => '+',
        138..=177 => '*',
        178..=215 => 'X',
        _ => '#',
    }
}

fn render(image: &Image, step: usize, cursor_up: bool) -> String {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let columns = width.div_ceil(step);
    let border = "==".repeat(columns);

    let mut text = String::new();
    if cursor_up {
        text.push_str("\x1b[");
        text.push_str(&(height / step + 2).to_string());
        text.push('A');
    }
    text.push_str("//");
    text.push_str(&border);
    text.push_str("\\\\\n");

    let pitch = image.pitch().max(1);
    for line in image.plane0().chunks(pitch).take(height).step_by(step) {
        text.push_str("||");
        for &value in line.iter().take(width).step_by(step) {
            let c = glyph(value);
            text.push(c);
            text.push(c);
        }
        text.push_str("||\n");
    }

    text.push_str("\\\\");
    text.push_str(&border);
    text.push_str("//\r\n");
    text
}
