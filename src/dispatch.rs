//! Per-frame conversion and fan-out to sinks.

use tracing::warn;

use crate::convert::{copy_grey, unpack_raw10, unpack_raw10_debayer, RawLayout};
use crate::error::{CaptureError, ConvertError};
use crate::image::{Image, ImageKind};
use crate::sinks::{FrameSink, SinkKind};
use crate::traits::{Format, FourCC};

/// Image kind produced for a wire encoding, or `None` if it has no
/// converter.
#[must_use]
pub fn image_kind_for(fourcc: FourCC) -> Option<ImageKind> {
    match fourcc {
        FourCC::GREY | FourCC::Y10P => Some(ImageKind::Grey),
        FourCC::SRGGB10P => Some(ImageKind::Rgb),
        _ => None,
    }
}

/// Convert one raw capture buffer according to the negotiated format.
pub fn convert_frame(format: &Format, data: &[u8]) -> Result<Image, ConvertError> {
    let kind = image_kind_for(format.fourcc).ok_or(ConvertError::UnsupportedFormat(format.fourcc))?;
    let mut image = Image::new(kind, format.width, format.height);
    let layout = RawLayout::full(format.width, format.height, format.padding_bytes());

    match format.fourcc {
        FourCC::GREY => copy_grey(&mut image, data, &layout)?,
        FourCC::Y10P => unpack_raw10(&mut image, data, 0, &layout)?,
        _ => unpack_raw10_debayer(&mut image, data, 0, &layout)?,
    }
    Ok(image)
}

/// Ordered set of enabled sinks.
///
/// Sinks are offered each frame in the order console, network,
/// framebuffer, file, regardless of the order they were added in.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Box<dyn FrameSink>>,
}

impl Dispatcher {
    /// Dispatcher without sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a sink.
    pub fn add(&mut self, sink: Box<dyn FrameSink>) {
        let position = self
            .sinks
            .partition_point(|existing| existing.kind() <= sink.kind());
        self.sinks.insert(position, sink);
    }

    /// Enabled sinks in delivery order.
    pub fn kinds(&self) -> Vec<SinkKind> {
        self.sinks.iter().map(|sink| sink.kind()).collect()
    }

    /// Whether no sink is enabled.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Offer `image` to every sink.
    ///
    /// A failing framebuffer is logged and skipped. Any other failure stops
    /// delivery of this frame to the remaining sinks.
    pub fn dispatch(&mut self, image: &Image, frame: u64) -> Result<(), CaptureError> {
        for sink in &mut self.sinks {
            let kind = sink.kind();
            match sink.consume(image, frame) {
                Ok(()) => {}
                Err(err) if !kind.is_fatal() => {
                    warn!(frame, sink = %kind, error = %err, "sink failed, frame skipped");
                }
                Err(source) => {
                    return Err(CaptureError::Sink {
                        frame,
                        sink: kind,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Convert a raw buffer and dispatch the result.
    pub fn process(&mut self, format: &Format, data: &[u8], frame: u64) -> Result<(), CaptureError> {
        let image =
            convert_frame(format, data).map_err(|source| CaptureError::Convert { frame, source })?;
        self.dispatch(&image, frame)
    }

    /// Let every sink release its resources. Failures are logged.
    pub fn finish(&mut self) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.finish() {
                warn!(sink = %sink.kind(), error = %err, "cannot shut sink down");
            }
        }
    }
}
