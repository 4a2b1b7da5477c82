//! The capture loop: wait, dequeue, process, re-enqueue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::pool::Dequeued;
use crate::session::{Readiness, Session};
use crate::traits::{CaptureDevice, Format};

/// Frames between throughput reports.
const FPS_INTERVAL: u64 = 100;

/// Drives a streaming session until it is stopped or fails.
#[derive(Debug, Clone)]
pub struct CaptureLoop {
    timeout: Duration,
    stop: Arc<AtomicBool>,
    max_frames: Option<u64>,
}

impl CaptureLoop {
    /// Loop that fails if no frame arrives within `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stop: Arc::new(AtomicBool::new(false)),
            max_frames: None,
        }
    }

    /// Use an externally owned stop flag, e.g. one set by a signal handler.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Stop gracefully after `max_frames` frames.
    #[must_use]
    pub const fn with_frame_limit(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Flag that ends the loop after the current iteration.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn should_stop(&self, frames: u64) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            info!(frames, "stop requested");
            return true;
        }
        if self.max_frames.is_some_and(|max| frames >= max) {
            info!(frames, "frame limit reached");
            return true;
        }
        false
    }

    /// Queue every buffer, start streaming and hand each filled buffer to
    /// `process` together with the negotiated format and a frame number.
    ///
    /// Returns the number of processed frames after a graceful stop. On
    /// error the session is left for the caller to close.
    pub fn run<D, F>(&self, session: &mut Session<D>, mut process: F) -> Result<u64, CaptureError>
    where
        D: CaptureDevice,
        F: FnMut(&Format, &[u8], u64) -> Result<(), CaptureError>,
    {
        session.enqueue_all()?;
        session.start_streaming()?;

        let mut meter = FpsMeter::new();
        let mut last_sequence = None;
        let mut frames = 0;
        while !self.should_stop(frames) {
            if self.step(session, &mut process, frames, &mut last_sequence)? {
                frames += 1;
                meter.tick();
            }
        }

        session.stop_streaming()?;
        Ok(frames)
    }

    /// One iteration. Returns whether a frame was processed.
    fn step<D, F>(
        &self,
        session: &mut Session<D>,
        process: &mut F,
        frame: u64,
        last_sequence: &mut Option<u32>,
    ) -> Result<bool, CaptureError>
    where
        D: CaptureDevice,
        F: FnMut(&Format, &[u8], u64) -> Result<(), CaptureError>,
    {
        if session.wait_for_data(self.timeout)? == Readiness::Timeout {
            return Err(CaptureError::Timeout(self.timeout));
        }

        let buffer = match session.dequeue()? {
            Dequeued::Filled(buffer) => buffer,
            Dequeued::Retry => {
                debug!("no buffer ready after wakeup");
                return Ok(false);
            }
        };
        if let Some(last) = *last_sequence {
            let expected = u32::wrapping_add(last, 1);
            if buffer.sequence != expected {
                warn!(expected, got = buffer.sequence, "driver dropped frames");
            }
        }
        *last_sequence = Some(buffer.sequence);

        let index = buffer.index as usize;
        let data = session.frame(index).unwrap_or_default();
        debug!(frame, index, sequence = buffer.sequence, bytes_used = buffer.bytes_used, "frame");
        process(session.format(), data, frame)?;

        session.enqueue(index)?;
        Ok(true)
    }
}

/// Logs throughput every [`FPS_INTERVAL`] frames.
#[derive(Debug)]
struct FpsMeter {
    since: Instant,
    frames: u64,
}

impl FpsMeter {
    fn new() -> Self {
        Self {
            since: Instant::now(),
            frames: 0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        if self.frames < FPS_INTERVAL {
            return;
        }
        let elapsed = self.since.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let fps = self.frames as f64 / elapsed;
            info!("capture throughput: {fps:.1} fps");
        }
        self.since = Instant::now();
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::error::{ConvertError, SessionError};
    use crate::mock::{Event, MockDevice};
    use crate::session::SessionOptions;
    use crate::sinks::PnmSink;

    fn mock_session(fill: u8, frame_budget: u32) -> (Session<MockDevice>, MockDevice) {
        let device = MockDevice::new();
        {
            let state = device.state();
            let mut state = state.borrow_mut();
            state.fill = fill;
            state.frame_budget = frame_budget;
        }
        let observer = device.observer();
        let session =
            Session::from_device(device, &SessionOptions::default()).expect("open should succeed");
        (session, observer)
    }

    #[test]
    fn test_grey_frame_written_as_pgm() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let (mut session, _device) = mock_session(128, 1);
        let mut dispatcher = Dispatcher::new();
        dispatcher.add(Box::new(PnmSink::new(dir.path())));

        let frames = CaptureLoop::new(Duration::from_millis(100))
            .with_frame_limit(Some(1))
            .run(&mut session, |format, data, frame| {
                dispatcher.process(format, data, frame)
            })
            .expect("capture should succeed");
        session.close().expect("close should succeed");
        assert_eq!(frames, 1);

        let data = std::fs::read(dir.path().join("img00000.pgm")).expect("file should exist");
        let header = b"P5 640 480 255 ";
        assert_eq!(&data[..header.len()], header);
        assert_eq!(data.len(), header.len() + 307_200);
        assert!(data[header.len()..].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_buffers_are_requeued() {
        let (mut session, device) = mock_session(0, 5);
        let mut seen = Vec::new();

        let frames = CaptureLoop::new(Duration::from_millis(100))
            .with_frame_limit(Some(5))
            .run(&mut session, |_, data, frame| {
                assert_eq!(data.len(), 307_200);
                seen.push(frame);
                Ok(())
            })
            .expect("capture should succeed");

        assert_eq!(frames, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        let events = device.events();
        let queued = events
            .iter()
            .filter(|event| matches!(event, Event::Queue(_)))
            .count();
        assert_eq!(queued, 3 + 5);
        assert_eq!(events.last(), Some(&Event::StreamOff));
    }

    #[test]
    fn test_timeout_is_fatal() {
        let (mut session, _device) = mock_session(0, 0);

        let result = CaptureLoop::new(Duration::from_millis(1)).run(&mut session, |_, _, _| Ok(()));
        assert!(matches!(result, Err(CaptureError::Timeout(_))));
        assert!(session.is_streaming());

        session.close().expect("close should succeed");
        assert!(!session.is_streaming());
    }

    #[test]
    fn test_stop_flag_ends_loop_gracefully() {
        let (mut session, device) = mock_session(0, 10);
        let capture = CaptureLoop::new(Duration::from_millis(100));
        capture.stop_flag().store(true, Ordering::Relaxed);

        let frames = capture
            .run(&mut session, |_, _, _| Ok(()))
            .expect("capture should stop cleanly");
        assert_eq!(frames, 0);
        assert!(device.events().ends_with(&[Event::StreamOn, Event::StreamOff]));
    }

    #[test]
    fn test_processing_error_stops_loop() {
        let (mut session, _device) = mock_session(0, 10);
        let mut calls = 0;

        let result = CaptureLoop::new(Duration::from_millis(100)).run(&mut session, |_, _, frame| {
            calls += 1;
            Err(CaptureError::Convert {
                frame,
                source: ConvertError::InvalidParameter("test"),
            })
        });
        assert!(matches!(result, Err(CaptureError::Convert { frame: 0, .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_stream_start_failure() {
        let (mut session, device) = mock_session(0, 1);
        device.state().borrow_mut().fail_stream_on = true;

        let result = CaptureLoop::new(Duration::from_millis(100)).run(&mut session, |_, _, _| Ok(()));
        assert!(matches!(
            result,
            Err(CaptureError::Session(SessionError::StreamControlFailed { on: true, .. }))
        ));
    }
}
