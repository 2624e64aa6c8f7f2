//! Screencast frame capture.
//!
//! Frames arrive base64-encoded with a capture timestamp but no duration; a
//! frame's duration is only known once the next frame arrives. One pending
//! frame is therefore buffered and written with the observed gap when its
//! successor shows up. Stopping flushes the pending frame with a minimal
//! synthetic duration, since the real on-screen time is unknowable.
//!
//! The recorder holds its own lock, independent of the run-state lock;
//! frame handling never contends with the event trackers.

use std::io;
use std::sync::{Mutex, PoisonError};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::timing;

/// Duration assigned to the final frame when capture stops.
const FINAL_FRAME_MS: u32 = 1;

/// Destination for decoded frames. Container muxing lives behind this seam.
pub trait FrameSink: Send {
    /// Write one frame that was displayed for `duration_ms`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the frame cannot be written.
    fn write_frame(&mut self, duration_ms: u32, image: &[u8]) -> io::Result<()>;

    /// Finalize the output.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when finalization fails.
    fn finish(&mut self) -> io::Result<()>;
}

struct VideoState {
    sink: Box<dyn FrameSink>,
    capturing: bool,
    /// Last frame seen, waiting for its successor to fix its duration.
    /// `(capture time in epoch millis, decoded image)`.
    pending: Option<(i64, Vec<u8>)>,
}

/// Buffers and times screencast frames on their way to a [`FrameSink`].
pub struct VideoRecorder {
    state: Mutex<VideoState>,
}

impl VideoRecorder {
    #[must_use]
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            state: Mutex::new(VideoState {
                sink,
                capturing: false,
                pending: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VideoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin accepting frames. Idempotent.
    pub fn start(&self) {
        self.lock().capturing = true;
    }

    /// Whether frames are currently being accepted.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    /// Handle one screencast frame. `data` is the base64 payload;
    /// `timestamp` is the capture time in epoch seconds when the browser
    /// supplied one.
    pub fn on_frame(&self, data: &str, timestamp: Option<f64>) {
        let image = match BASE64.decode(data) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!("dropping undecodable screencast frame: {err}");
                return;
            }
        };
        let time = timestamp.map_or_else(timing::now_millis, timing::millis_from_seconds);

        let mut state = self.lock();
        if !state.capturing {
            return;
        }
        if let Some((prev_time, prev_image)) = state.pending.take() {
            let duration = u32::try_from(time - prev_time).unwrap_or(0).max(1);
            if let Err(err) = state.sink.write_frame(duration, &prev_image) {
                tracing::error!("failed to write video frame: {err}");
            }
        }
        state.pending = Some((time, image));
    }

    /// Stop capturing, flush the pending frame, and finalize the sink.
    /// Idempotent; frames arriving after stop are dropped.
    pub fn stop(&self) {
        let mut state = self.lock();
        if !state.capturing {
            return;
        }
        state.capturing = false;
        if let Some((_, image)) = state.pending.take() {
            if let Err(err) = state.sink.write_frame(FINAL_FRAME_MS, &image) {
                tracing::error!("failed to write final video frame: {err}");
            }
        }
        if let Err(err) = state.sink.finish() {
            tracing::error!("failed to finalize video: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct SinkLog {
        frames: Vec<(u32, Vec<u8>)>,
        finished: bool,
    }

    #[derive(Clone, Default)]
    struct TestSink(Arc<Mutex<SinkLog>>);

    impl FrameSink for TestSink {
        fn write_frame(&mut self, duration_ms: u32, image: &[u8]) -> io::Result<()> {
            self.0
                .lock()
                .unwrap()
                .frames
                .push((duration_ms, image.to_vec()));
            Ok(())
        }

        fn finish(&mut self) -> io::Result<()> {
            self.0.lock().unwrap().finished = true;
            Ok(())
        }
    }

    fn encoded(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    #[test]
    fn frame_written_with_gap_to_successor() {
        let sink = TestSink::default();
        let recorder = VideoRecorder::new(Box::new(sink.clone()));
        recorder.start();
        recorder.on_frame(&encoded(b"one"), Some(10.0));
        recorder.on_frame(&encoded(b"two"), Some(10.25));
        let log = sink.0.lock().unwrap();
        assert_eq!(log.frames, vec![(250, b"one".to_vec())]);
    }

    #[test]
    fn stop_flushes_pending_with_minimal_duration() {
        let sink = TestSink::default();
        let recorder = VideoRecorder::new(Box::new(sink.clone()));
        recorder.start();
        recorder.on_frame(&encoded(b"only"), Some(5.0));
        recorder.stop();
        let log = sink.0.lock().unwrap();
        assert_eq!(log.frames, vec![(1, b"only".to_vec())]);
        assert!(log.finished);
    }

    #[test]
    fn frames_before_start_and_after_stop_are_dropped() {
        let sink = TestSink::default();
        let recorder = VideoRecorder::new(Box::new(sink.clone()));
        recorder.on_frame(&encoded(b"early"), Some(1.0));
        recorder.start();
        recorder.on_frame(&encoded(b"a"), Some(2.0));
        recorder.stop();
        recorder.on_frame(&encoded(b"late"), Some(3.0));
        let log = sink.0.lock().unwrap();
        assert_eq!(log.frames.len(), 1);
        assert_eq!(log.frames[0].1, b"a".to_vec());
    }

    #[test]
    fn out_of_order_timestamps_clamp_to_one_millisecond() {
        let sink = TestSink::default();
        let recorder = VideoRecorder::new(Box::new(sink.clone()));
        recorder.start();
        recorder.on_frame(&encoded(b"a"), Some(10.0));
        recorder.on_frame(&encoded(b"b"), Some(9.5));
        let log = sink.0.lock().unwrap();
        assert_eq!(log.frames, vec![(1, b"a".to_vec())]);
    }

    #[test]
    fn bad_base64_is_ignored() {
        let sink = TestSink::default();
        let recorder = VideoRecorder::new(Box::new(sink.clone()));
        recorder.start();
        recorder.on_frame("!!!not base64!!!", Some(1.0));
        recorder.stop();
        assert!(sink.0.lock().unwrap().frames.is_empty());
    }
}
