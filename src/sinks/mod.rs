//! Destinations for converted frames.

use std::fmt;

use crate::error::SinkError;
use crate::image::Image;

pub mod console;
pub mod framebuffer;
pub mod network;
pub mod pnm;

pub use console::ConsoleSink;
pub use framebuffer::FramebufferSink;
pub use network::NetworkSink;
pub use pnm::PnmSink;

/// Sink identity. The ordering is the order frames are offered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SinkKind {
    /// ASCII preview on the terminal.
    Console,
    /// PNM records over TCP.
    Network,
    /// Linux framebuffer preview.
    Framebuffer,
    /// PNM files on disk.
    File,
}

impl SinkKind {
    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Network => "network",
            Self::Framebuffer => "framebuffer",
            Self::File => "file",
        }
    }

    /// Whether a failure of this sink stops the capture loop.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Framebuffer)
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Consumer of converted images.
pub trait FrameSink {
    /// Which sink this is.
    fn kind(&self) -> SinkKind;

    /// Handle one converted frame.
    fn consume(&mut self, image: &Image, frame: u64) -> Result<(), SinkError>;

    /// Release external resources once capture has ended.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
