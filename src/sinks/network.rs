//! Publishes frames as PNM records over a TCP connection.

use std::io::{self, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use super::pnm::encode_pnm;
use super::{FrameSink, SinkKind};
use crate::error::SinkError;
use crate::image::{Image, ImageKind};

/// Streams every frame to a connected image server.
///
/// The staging image is allocated once at attach time with the geometry the
/// session negotiated. Each frame is copied into it before it is sent.
#[derive(Debug)]
pub struct NetworkSink {
    stream: BufWriter<TcpStream>,
    staging: Image,
}

impl NetworkSink {
    /// Connect to `addr` and prepare a staging image.
    pub fn attach<A: ToSocketAddrs>(
        addr: A,
        kind: ImageKind,
        width: u32,
        height: u32,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!(peer = %stream.peer_addr()?, ?kind, width, height, "image server attached");
        Ok(Self {
            stream: BufWriter::new(stream),
            staging: Image::new(kind, width, height),
        })
    }

    /// Flush pending output and shut the connection down.
    pub fn detach(&mut self) -> io::Result<()> {
        self.stream.flush()?;
        self.stream.get_ref().shutdown(Shutdown::Both)?;
        debug!("image server detached");
        Ok(())
    }
}

impl FrameSink for NetworkSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Network
    }

    fn consume(&mut self, image: &Image, _frame: u64) -> Result<(), SinkError> {
        self.staging
            .copy_from(image)
            .map_err(|(expected, found)| SinkError::ImageMismatch {
                sink: "network",
                expected,
                found,
            })?;
        encode_pnm(&mut self.stream, &self.staging)
            .and_then(|()| self.stream.flush())
            .map_err(|err| SinkError::io("network", err))
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.detach().map_err(|err| SinkError::io("network", err))
    }
}
