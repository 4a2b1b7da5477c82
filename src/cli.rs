//! Command line options of the `mipi-capture` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use crate::session::{SessionOptions, DEFAULT_BUFFER_COUNT};
use crate::sinks::console::DEFAULT_STEP;
use crate::traits::FourCC;

/// Capture frames from a V4L2 MIPI camera
#[derive(Parser, Debug, Clone)]
#[command(name = "mipi-capture")]
#[command(version, about = "Capture frames from a V4L2 MIPI camera", long_about = None)]
pub struct Args {
    /// Exposure time written to the exposure control
    #[arg(short = 's', long, value_name = "N", default_value_t = 5000)]
    pub shutter: i32,

    /// Analog gain written to the gain control
    #[arg(short = 'g', long, value_name = "N", default_value_t = 10)]
    pub gain: i32,

    /// Number of capture buffers to request
    #[arg(
        short = 'b',
        long,
        value_name = "N",
        default_value_t = DEFAULT_BUFFER_COUNT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub buffers: u32,

    /// Show frames on the framebuffer
    #[arg(short = 'f', long)]
    pub framebuffer: bool,

    /// Disable the ASCII preview on stdout
    #[arg(short = 'a', long)]
    pub no_ascii: bool,

    /// Write every frame as a PGM/PPM file
    #[arg(short = 'o', long)]
    pub file_output: bool,

    /// Video capture device
    #[arg(long, value_name = "PATH", default_value = "/dev/video0")]
    pub device: PathBuf,

    /// Framebuffer device used with --framebuffer
    #[arg(long, value_name = "PATH", default_value = "/dev/fb0")]
    pub fb_device: PathBuf,

    /// Directory for --file-output images
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Give up when no frame arrives within this many milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Sampling step of the ASCII preview, in pixels
    #[arg(long, value_name = "N", default_value_t = DEFAULT_STEP)]
    pub ascii_step: usize,

    /// Pixel encoding to request, e.g. GREY, "Y10" or pRAA
    #[arg(long, value_name = "FOURCC")]
    pub pixel_format: Option<FourCC>,

    /// Publish frames to an image server at this address
    #[arg(long, value_name = "ADDRESS")]
    pub publish: Option<String>,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    pub frames: Option<u64>,
}

impl Args {
    /// Session settings derived from the options.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            buffer_count: self.buffers,
            pixel_format: self.pixel_format,
        }
    }

    /// Readiness timeout of the capture loop.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Exit status for a command line that failed to parse.
///
/// Unknown options are treated like `--help`: usage is printed and the
/// process exits with status 0. Malformed values keep clap's error status.
pub fn exit_code(err: &clap::Error) -> i32 {
    if err.kind() == ErrorKind::UnknownArgument {
        0
    } else {
        err.exit_code()
    }
}

/// Print a parse failure, followed by usage for unknown options, and return
/// the exit status.
pub fn report_parse_error(err: &clap::Error) -> i32 {
    if let Err(io) = err.print() {
        eprintln!("cannot print usage: {io}");
    }
    if err.kind() == ErrorKind::UnknownArgument {
        println!("{}", Args::command().render_help());
    }
    exit_code(err)
}
