//! Playback loop: the timer worker between the buffer and the display.
//!
//! Every poll interval it asks the clock for the target timestamp, drains
//! frames whose display window has passed, and hands the closest buffered
//! frame to the sink if it isn't the one already on screen.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::PlaybackClock;
use crate::frame::{Frame, FrameSink, Rotation};
use crate::frame_buffer::TimestampFrameBuffer;
use crate::prefetch::PrefetchStatus;
use crate::worker::Worker;

const NOTHING_EMITTED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Follow the clock until cancelled or the stream ends
    Continuous,
    /// Show the frame for the (paused) clock position once, then exit
    PreviewOnce,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Emitted(i64),
    Idle,
    Ended,
}

/// Counters and flags shared by the loop and the player.
#[derive(Debug)]
pub struct LoopShared {
    /// Bumped by every control operation that invalidates a running loop
    generation: Mutex<u64>,
    ended: AtomicBool,
    last_emitted_ms: AtomicI64,
    frames_emitted: AtomicU64,
    frames_skipped: AtomicU64,
    idle_ticks: AtomicU64,
}

impl Default for LoopShared {
    fn default() -> Self {
        Self {
            generation: Mutex::new(0),
            ended: AtomicBool::new(false),
            last_emitted_ms: AtomicI64::new(NOTHING_EMITTED),
            frames_emitted: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
        }
    }
}

impl LoopShared {
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Invalidate loops started earlier and clear the ended flag. Returns
    /// whether one of them had already reached the end of the stream.
    pub fn next_generation(&self) -> bool {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.ended.swap(false, Ordering::SeqCst)
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn last_emitted_ms(&self) -> Option<i64> {
        match self.last_emitted_ms.load(Ordering::SeqCst) {
            NOTHING_EMITTED => None,
            ts => Some(ts),
        }
    }

    pub fn forget_last_emitted(&self) {
        self.last_emitted_ms.store(NOTHING_EMITTED, Ordering::SeqCst);
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.frames_emitted.store(0, Ordering::Relaxed);
        self.frames_skipped.store(0, Ordering::Relaxed);
        self.idle_ticks.store(0, Ordering::Relaxed);
        self.forget_last_emitted();
    }
}

/// Everything one loop run reads.
#[derive(Clone)]
pub struct LoopContext {
    pub buffer: Arc<TimestampFrameBuffer>,
    pub clock: Arc<PlaybackClock>,
    pub sink: Arc<dyn FrameSink>,
    pub prefetch: Arc<PrefetchStatus>,
    pub shared: Arc<LoopShared>,
    pub rotation: Rotation,
    pub frame_interval_ms: i64,
    pub duration_ms: i64,
    pub poll_interval: Duration,
    /// Generation this run belongs to
    pub generation: u64,
}

impl LoopContext {
    /// Hand `frame` to the sink and remember it as on screen.
    pub fn emit(&self, frame: &Frame) {
        self.sink.on_frame(frame, self.rotation);
        self.shared
            .last_emitted_ms
            .store(frame.timestamp_ms(), Ordering::SeqCst);
        self.shared.frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// One iteration of the loop body.
    pub fn tick(&self, mode: LoopMode) -> Tick {
        let target = self.clock.position_ms();
        let end_of_stream = self.prefetch.is_end_of_stream();
        let last = self.shared.last_emitted_ms();

        // Drain frames whose window [ts, ts + interval) is over
        let mut drain_before = target - self.frame_interval_ms + 1;
        if let Some(last) = last {
            // Decoder lagging: keep the picture on screen as the fallback
            if last < drain_before && !end_of_stream && self.buffer.next(last).is_none() {
                drain_before = last;
            }
        }
        let on_screen_drained = last.is_some_and(|last| {
            last < drain_before && self.buffer.exact(last).is_some()
        });
        let drained = self.buffer.discard_before(drain_before);
        let skipped = drained.saturating_sub(usize::from(on_screen_drained));
        if skipped > 0 {
            self.shared
                .frames_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }

        if mode == LoopMode::PreviewOnce
            && !end_of_stream
            && self.buffer.end_time().map_or(true, |end| end < target)
        {
            // Wait until the frame for the target has been decoded
            self.shared.idle_ticks.fetch_add(1, Ordering::Relaxed);
            return Tick::Idle;
        }

        match self.buffer.closest(target) {
            Some(frame) if Some(frame.timestamp_ms()) != last => {
                self.emit(&frame);
                Tick::Emitted(frame.timestamp_ms())
            }
            None if end_of_stream && self.buffer.is_empty() => Tick::Ended,
            _ => {
                self.shared.idle_ticks.fetch_add(1, Ordering::Relaxed);
                Tick::Idle
            }
        }
    }

    /// Pause the clock at the end unless a control op has moved on since.
    fn finish(&self) {
        let generation = self.shared.generation.lock();
        if *generation == self.generation {
            self.clock.pause_at(self.duration_ms);
            self.shared.ended.store(true, Ordering::SeqCst);
            info!("Playback reached end of stream at {} ms", self.duration_ms);
        }
    }
}

pub struct PlaybackLoop {
    worker: Worker<()>,
}

impl PlaybackLoop {
    pub fn start(ctx: LoopContext, mode: LoopMode) -> std::io::Result<Self> {
        let worker = Worker::spawn("cutframe-playback", move |cancel| {
            debug!("Playback loop started ({:?})", mode);
            while !cancel.is_cancelled() {
                match ctx.tick(mode) {
                    Tick::Ended => {
                        ctx.finish();
                        break;
                    }
                    Tick::Emitted(_) if mode == LoopMode::PreviewOnce => break,
                    _ => {}
                }
                if cancel.sleep(ctx.poll_interval) {
                    break;
                }
            }
            debug!("Playback loop exited");
        })?;
        Ok(Self { worker })
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Cancel and wait. Returns false if the worker had to be detached.
    pub fn stop(self, timeout: Duration) -> bool {
        self.worker.stop(timeout).is_some()
    }
}
