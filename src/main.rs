//! mipi-capture binary: stream camera frames to the console, files, the
//! framebuffer or an image server.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mipi_capture::cli::{self, Args};
use mipi_capture::dispatch::image_kind_for;
use mipi_capture::sinks::{ConsoleSink, FramebufferSink, NetworkSink, PnmSink};
use mipi_capture::{CaptureError, CaptureLoop, Dispatcher, Format, Session, V4L2Device};

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => std::process::exit(cli::report_parse_error(&err)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mipi_capture=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        warn!(error = %err, "cannot install signal handler, stop with SIGKILL");
    }

    match run(&args, stop) {
        Ok(frames) => info!(frames, "capture finished"),
        Err(err) => {
            eprintln!("Error: {}", report(&err));
            std::process::exit(1);
        }
    }
}

fn run(args: &Args, stop: Arc<AtomicBool>) -> Result<u64, CaptureError> {
    let mut session: Session<V4L2Device> = Session::open(&args.device, &args.session_options())?;
    session.set_parameters(args.gain, args.shutter)?;

    let format = session.format().clone();
    let mut dispatcher = build_dispatcher(args, &format);
    if dispatcher.is_empty() {
        warn!("no output enabled, frames are captured and dropped");
    }

    let capture = CaptureLoop::new(args.timeout())
        .with_stop_flag(stop)
        .with_frame_limit(args.frames);
    let result = capture.run(&mut session, |format, data, frame| {
        dispatcher.process(format, data, frame)
    });

    dispatcher.finish();
    let closed = session.close();
    let frames = result?;
    closed?;
    Ok(frames)
}

fn build_dispatcher(args: &Args, format: &Format) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    if !args.no_ascii {
        dispatcher.add(Box::new(ConsoleSink::stdout(args.ascii_step)));
    }

    if let Some(addr) = &args.publish {
        match image_kind_for(format.fourcc) {
            Some(kind) => match NetworkSink::attach(addr.as_str(), kind, format.width, format.height) {
                Ok(sink) => dispatcher.add(Box::new(sink)),
                Err(err) => warn!(addr = %addr, error = %err, "image server unavailable, publishing disabled"),
            },
            None => warn!(fourcc = %format.fourcc, "no converter for format, publishing disabled"),
        }
    }

    if args.framebuffer {
        match FramebufferSink::open(&args.fb_device) {
            Ok(sink) => {
                let geometry = sink.geometry();
                info!(
                    xres = geometry.xres,
                    yres = geometry.yres,
                    line_length = geometry.line_length,
                    "framebuffer preview enabled"
                );
                dispatcher.add(Box::new(sink));
            }
            Err(err) => warn!(
                device = %args.fb_device.display(),
                error = %err,
                "framebuffer unavailable, preview disabled"
            ),
        }
    }

    if args.file_output {
        let sink = PnmSink::new(&args.output_dir);
        info!(dir = %sink.dir().display(), "writing frames to files");
        dispatcher.add(Box::new(sink));
    }

    info!(sinks = ?dispatcher.kinds(), "outputs enabled");
    dispatcher
}

/// The error and its chain of sources, separated by colons.
fn report(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
