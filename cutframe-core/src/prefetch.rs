//! Prefetch worker: decodes ahead of the playback clock into the buffer.
//!
//! ```text
//!   grab() ──► pending frame ──► would evict a frame the clock still needs?
//!                                   yes: back off, keep the frame, ask again
//!                                   no:  append
//! ```
//!
//! The worker owns the decoder while it runs and hands it back on stop, so
//! the player can seek it and start a fresh worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::clock::PlaybackClock;
use crate::decoder::{DecodeFrameError, Grab, VideoDecoder};
use crate::frame_buffer::TimestampFrameBuffer;
use crate::worker::{CancelToken, Worker};

#[derive(Debug, Clone, Copy)]
pub struct PrefetchSettings {
    /// Wait between back-pressure checks
    pub backoff: Duration,
    /// Wait after a failed grab
    pub decode_retry: Duration,
    /// Give up on the stream after this many failures in a row
    pub max_consecutive_errors: u32,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(5),
            decode_retry: Duration::from_millis(10),
            max_consecutive_errors: 50,
        }
    }
}

/// State the worker publishes to the rest of the pipeline.
#[derive(Debug, Default)]
pub struct PrefetchStatus {
    end_of_stream: AtomicBool,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    backpressure_waits: AtomicU64,
}

impl PrefetchStatus {
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::SeqCst);
    }

    /// Called before a worker restarts on a repositioned decoder.
    pub fn reset_end_of_stream(&self) {
        self.end_of_stream.store(false, Ordering::SeqCst);
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn backpressure_waits(&self) -> u64 {
        self.backpressure_waits.load(Ordering::Relaxed)
    }
}

pub struct Prefetcher {
    worker: Worker<Box<dyn VideoDecoder>>,
}

impl Prefetcher {
    /// Spawn the worker. On spawn failure the decoder is dropped with the
    /// closure.
    pub fn start(
        decoder: Box<dyn VideoDecoder>,
        buffer: Arc<TimestampFrameBuffer>,
        clock: Arc<PlaybackClock>,
        status: Arc<PrefetchStatus>,
        settings: PrefetchSettings,
    ) -> std::io::Result<Self> {
        let worker = Worker::spawn("cutframe-prefetch", move |cancel| {
            run(decoder, &buffer, &clock, &status, settings, cancel)
        })?;
        Ok(Self { worker })
    }

    /// True once the worker has exited on its own (end of stream).
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Cancel and take the decoder back. `None` if the worker missed
    /// `timeout` and was detached.
    pub fn stop(self, timeout: Duration) -> Option<Box<dyn VideoDecoder>> {
        self.worker.stop(timeout)
    }
}

fn run(
    mut decoder: Box<dyn VideoDecoder>,
    buffer: &TimestampFrameBuffer,
    clock: &PlaybackClock,
    status: &PrefetchStatus,
    settings: PrefetchSettings,
    cancel: &CancelToken,
) -> Box<dyn VideoDecoder> {
    let mut consecutive_errors = 0u32;

    'decode: while !cancel.is_cancelled() {
        let frame = match decoder.grab() {
            Ok(Grab::Frame(frame)) => {
                consecutive_errors = 0;
                frame
            }
            Ok(Grab::EndOfStream) => {
                debug!("Prefetch reached end of stream");
                status.mark_end_of_stream();
                break;
            }
            Err(DecodeFrameError::Closed) => {
                warn!("Prefetch stopped: decoder closed");
                status.mark_end_of_stream();
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                status.decode_errors.fetch_add(1, Ordering::Relaxed);
                if consecutive_errors >= settings.max_consecutive_errors {
                    error!(
                        "Giving up after {} consecutive decode errors: {}",
                        consecutive_errors, e
                    );
                    status.mark_end_of_stream();
                    break;
                }
                warn!("Decode error ({} in a row): {}", consecutive_errors, e);
                if cancel.sleep(settings.decode_retry) {
                    break;
                }
                continue;
            }
        };
        status.frames_decoded.fetch_add(1, Ordering::Relaxed);

        while buffer.would_evict_at_or_after(clock.position_ms()) {
            status.backpressure_waits.fetch_add(1, Ordering::Relaxed);
            if cancel.sleep(settings.backoff) {
                break 'decode;
            }
        }
        buffer.append(frame);
    }

    decoder
}
