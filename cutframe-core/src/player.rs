//! # Player
//!
//! Facade over the playback pipeline for one video at a time.
//!
//! ```text
//!                 ┌──────────────── Player ────────────────┐
//!  initialize ──► │ decoder ─► Prefetcher ─► buffer         │
//!  play/pause ──► │                 clock ─► PlaybackLoop ──┼──► FrameSink
//!  seek_to ─────► │ (buffer hit: emit now / miss: reposition)│
//!                 └─────────────────────────────────────────┘
//! ```
//!
//! Control operations take `&mut self`, so they never race each other. Every
//! one of them bumps the loop generation first, which keeps a loop that is
//! just reaching the end of the stream from pausing a clock the caller has
//! already moved.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::clock::{PlaybackClock, SystemTime, TimeSource};
use crate::config::PlayerConfig;
use crate::decoder::{open_decoder, DecoderOpenError, VideoDecoder, VideoInfo};
use crate::frame::FrameSink;
use crate::frame_buffer::{BufferStats, TimestampFrameBuffer};
use crate::playback::{LoopContext, LoopMode, LoopShared, PlaybackLoop};
use crate::prefetch::{PrefetchStatus, Prefetcher};

// ============================================================================
// Errors / State
// ============================================================================

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    DecoderOpen(#[from] DecoderOpenError),
    #[error("No video loaded")]
    NotInitialized,
    #[error("Failed to spawn {0} worker: {1}")]
    WorkerSpawn(&'static str, #[source] std::io::Error),
    #[error("Decoder is held by a stalled worker")]
    DecoderUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Initialized,
    Playing,
    Paused,
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStats {
    pub position_ms: i64,
    pub frames_emitted: u64,
    /// Frames drained without ever reaching the sink
    pub frames_skipped: u64,
    pub idle_ticks: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub backpressure_waits: u64,
    pub end_of_stream: bool,
    pub buffer: BufferStats,
}

struct Session {
    info: VideoInfo,
    buffer: Arc<TimestampFrameBuffer>,
    sink: Arc<dyn FrameSink>,
    prefetch_status: Arc<PrefetchStatus>,
    prefetcher: Option<Prefetcher>,
    /// Decoder while no prefetcher owns it
    parked: Option<Box<dyn VideoDecoder>>,
    playback: Option<PlaybackLoop>,
}

// ============================================================================
// Player
// ============================================================================

pub struct Player {
    config: PlayerConfig,
    clock: Arc<PlaybackClock>,
    shared: Arc<LoopShared>,
    state: PlayerState,
    /// Last loop stopped at the end of the stream
    at_end: bool,
    session: Option<Session>,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        Self::with_time_source(config, Arc::new(SystemTime))
    }

    pub fn with_time_source(config: PlayerConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            config: config.validated(),
            clock: Arc::new(PlaybackClock::new(time)),
            shared: Arc::new(LoopShared::default()),
            state: PlayerState::Stopped,
            at_end: false,
            session: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Open `path` and start decoding ahead. The first frame is shown once
    /// decoded; playback waits for `play`.
    pub fn initialize(
        &mut self,
        path: impl AsRef<Path>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), PlayerError> {
        let path = path.as_ref();
        let decoder = open_decoder(path).map_err(|e| {
            error!("Failed to open {}: {}", path.display(), e);
            e
        })?;
        self.initialize_with(decoder, sink)
    }

    /// Start a session on an already opened decoder.
    pub fn initialize_with(
        &mut self,
        decoder: Box<dyn VideoDecoder>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), PlayerError> {
        self.stop();

        let info = decoder.info().clone();
        info!(
            "Initializing {} ({}x{}, {:.2} fps, {} ms)",
            decoder.name(),
            info.width,
            info.height,
            info.frame_rate,
            info.duration_ms
        );

        let buffer = Arc::new(
            TimestampFrameBuffer::new(self.config.buffer_capacity)
                .with_tolerance(self.config.match_tolerance_ms),
        );
        let prefetch_status = Arc::new(PrefetchStatus::default());
        self.clock.pause_at(0);
        self.shared.next_generation();
        self.at_end = false;
        self.shared.reset_counters();

        let prefetcher = Prefetcher::start(
            decoder,
            Arc::clone(&buffer),
            Arc::clone(&self.clock),
            Arc::clone(&prefetch_status),
            self.config.prefetch_settings(),
        )
        .map_err(|e| PlayerError::WorkerSpawn("prefetch", e))?;

        self.session = Some(Session {
            info,
            buffer,
            sink,
            prefetch_status,
            prefetcher: Some(prefetcher),
            parked: None,
            playback: None,
        });
        self.state = PlayerState::Initialized;
        self.start_loop(LoopMode::PreviewOnce)
    }

    /// Start or resume. From the end of the stream, starts over at 0.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.require_session()?;
        if self.state == PlayerState::Playing && !self.shared.has_ended() {
            return Ok(());
        }

        self.invalidate_loop();
        self.stop_loop();
        if self.at_end {
            debug!("Play from end, restarting at 0");
            self.at_end = false;
            self.clock.seek(0);
            self.reposition(0, None)?;
        }

        self.clock.play();
        self.start_loop(LoopMode::Continuous)?;
        self.state = PlayerState::Playing;
        debug!("Playing from {} ms", self.clock.position_ms());
        Ok(())
    }

    /// Freeze on the current frame. Repeated calls change nothing.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        self.require_session()?;
        if self.state != PlayerState::Playing {
            return Ok(());
        }

        self.invalidate_loop();
        self.stop_loop();
        if self.state == PlayerState::Playing {
            self.clock.pause();
            self.state = PlayerState::Paused;
        }
        debug!("Paused at {} ms", self.clock.position_ms());
        Ok(())
    }

    /// Jump to `timestamp_ms`, clamped into the video. Playback keeps going
    /// if it was going, even when the stream ended just before the seek.
    pub fn seek_to(&mut self, timestamp_ms: i64) -> Result<(), PlayerError> {
        let duration_ms = self.require_session()?.info.duration_ms;
        let playing = self.state == PlayerState::Playing;

        let target = timestamp_ms.clamp(0, duration_ms);
        self.shared.next_generation();
        self.at_end = false;
        self.stop_loop();
        self.clock.seek(target);
        if playing {
            self.clock.play();
        }

        let mode = if playing {
            LoopMode::Continuous
        } else {
            LoopMode::PreviewOnce
        };

        if self.serve_from_buffer(target) {
            debug!("Seek to {} ms served from buffer", target);
            if mode == LoopMode::Continuous {
                self.start_loop(mode)?;
            }
        } else {
            debug!("Seek to {} ms repositions the decoder", target);
            self.reposition(target, Some(mode))?;
        }
        Ok(())
    }

    /// Tear the session down: workers stopped, decoder closed, buffer cleared.
    pub fn stop(&mut self) {
        self.shared.next_generation();
        let timeout = self.config.worker_join_timeout();

        if let Some(mut session) = self.session.take() {
            if let Some(playback) = session.playback.take() {
                playback.stop(timeout);
            }
            let decoder = match session.prefetcher.take() {
                Some(prefetcher) => prefetcher.stop(timeout),
                None => session.parked.take(),
            };
            match decoder {
                Some(mut decoder) => decoder.close(),
                None => warn!("Decoder still held by a detached worker, not closed"),
            }
            session.buffer.clear();
            info!("Playback stopped");
        }

        self.clock.pause_at(0);
        self.at_end = false;
        self.state = PlayerState::Stopped;
    }

    /// Current playback position, within `[0, duration_ms]`.
    pub fn current_position(&self) -> i64 {
        match &self.session {
            Some(session) => self.clock.position_ms().clamp(0, session.info.duration_ms),
            None => 0,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.session.as_ref().map_or(0, |s| s.info.duration_ms)
    }

    pub fn state(&self) -> PlayerState {
        if self.state == PlayerState::Playing && self.shared.has_ended() {
            PlayerState::Paused
        } else {
            self.state
        }
    }

    pub fn video_info(&self) -> Option<&VideoInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn stats(&self) -> PlaybackStats {
        let (buffer, status) = match &self.session {
            Some(session) => (
                session.buffer.stats(),
                Some(Arc::clone(&session.prefetch_status)),
            ),
            None => (TimestampFrameBuffer::new(self.config.buffer_capacity).stats(), None),
        };
        PlaybackStats {
            position_ms: self.current_position(),
            frames_emitted: self.shared.frames_emitted(),
            frames_skipped: self.shared.frames_skipped(),
            idle_ticks: self.shared.idle_ticks(),
            frames_decoded: status.as_ref().map_or(0, |s| s.frames_decoded()),
            decode_errors: status.as_ref().map_or(0, |s| s.decode_errors()),
            backpressure_waits: status.as_ref().map_or(0, |s| s.backpressure_waits()),
            end_of_stream: status.as_ref().is_some_and(|s| s.is_end_of_stream()),
            buffer,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_session(&self) -> Result<&Session, PlayerError> {
        self.session.as_ref().ok_or(PlayerError::NotInitialized)
    }

    /// Invalidate the running loop. An end of stream it reached first is
    /// folded into the player state.
    fn invalidate_loop(&mut self) {
        if self.shared.next_generation() {
            self.at_end = true;
            if self.state == PlayerState::Playing {
                self.state = PlayerState::Paused;
            }
        }
    }

    fn loop_context(&self, session: &Session) -> LoopContext {
        LoopContext {
            buffer: Arc::clone(&session.buffer),
            clock: Arc::clone(&self.clock),
            sink: Arc::clone(&session.sink),
            prefetch: Arc::clone(&session.prefetch_status),
            shared: Arc::clone(&self.shared),
            rotation: session.info.rotation,
            frame_interval_ms: session.info.frame_interval_ms(),
            duration_ms: session.info.duration_ms,
            poll_interval: self.config.poll_interval(),
            generation: self.shared.generation(),
        }
    }

    fn start_loop(&mut self, mode: LoopMode) -> Result<(), PlayerError> {
        let session = self.session.as_ref().ok_or(PlayerError::NotInitialized)?;
        let ctx = self.loop_context(session);
        let playback =
            PlaybackLoop::start(ctx, mode).map_err(|e| PlayerError::WorkerSpawn("playback", e))?;
        if let Some(session) = self.session.as_mut() {
            session.playback = Some(playback);
        }
        Ok(())
    }

    fn stop_loop(&mut self) {
        let timeout = self.config.worker_join_timeout();
        if let Some(playback) = self.session.as_mut().and_then(|s| s.playback.take()) {
            playback.stop(timeout);
        }
    }

    /// Emit the frame for `target` straight from the buffer when it holds
    /// one within a frame interval at or after the target.
    fn serve_from_buffer(&self, target: i64) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let buffer = &session.buffer;
        if buffer.start_time().map_or(true, |start| start > target) {
            return false;
        }

        let interval = session.info.frame_interval_ms();
        let covered = buffer
            .exact(target)
            .or_else(|| buffer.next(target))
            .is_some_and(|frame| frame.timestamp_ms() - target < interval);
        if !covered {
            return false;
        }

        match buffer.closest(target) {
            Some(frame) => {
                self.loop_context(session).emit(&frame);
                true
            }
            None => false,
        }
    }

    /// Restart decoding at `target` on an empty buffer.
    fn reposition(&mut self, target: i64, then: Option<LoopMode>) -> Result<(), PlayerError> {
        self.stop_loop();
        let timeout = self.config.worker_join_timeout();
        let settings = self.config.prefetch_settings();
        let session = self.session.as_mut().ok_or(PlayerError::NotInitialized)?;

        let decoder = match session.prefetcher.take() {
            Some(prefetcher) => prefetcher.stop(timeout),
            None => session.parked.take(),
        };
        let Some(mut decoder) = decoder else {
            error!("Cannot seek: decoder held by a stalled worker");
            self.stop();
            return Err(PlayerError::DecoderUnavailable);
        };

        session.buffer.clear();
        session.prefetch_status.reset_end_of_stream();
        self.shared.forget_last_emitted();
        if let Err(e) = decoder.seek(target) {
            warn!("Decoder seek to {} ms failed: {}", target, e);
        }

        let prefetcher = Prefetcher::start(
            decoder,
            Arc::clone(&session.buffer),
            Arc::clone(&self.clock),
            Arc::clone(&session.prefetch_status),
            settings,
        )
        .map_err(|e| PlayerError::WorkerSpawn("prefetch", e))?;
        session.prefetcher = Some(prefetcher);

        match then {
            Some(mode) => self.start_loop(mode),
            None => Ok(()),
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::TestPatternDecoder;
    use crate::frame::{Frame, Rotation};
    use parking_lot::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    type Shown = Arc<Mutex<Vec<(i64, Rotation)>>>;

    fn recording_sink() -> (Arc<dyn FrameSink>, Shown) {
        let shown: Shown = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&shown);
        let sink = move |frame: &Frame, rotation: Rotation| {
            log.lock().push((frame.timestamp_ms(), rotation));
        };
        (Arc::new(sink), shown)
    }

    fn last_shown(shown: &Shown) -> Option<i64> {
        shown.lock().last().map(|(ts, _)| *ts)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn pattern(duration_ms: i64) -> Box<dyn VideoDecoder> {
        Box::new(TestPatternDecoder::new(duration_ms, 30.0, 64, 36))
    }

    #[test]
    fn test_requires_initialize() {
        let mut player = Player::default();
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(matches!(player.play(), Err(PlayerError::NotInitialized)));
        assert!(matches!(player.pause(), Err(PlayerError::NotInitialized)));
        assert!(matches!(player.seek_to(10), Err(PlayerError::NotInitialized)));
        player.stop();
        assert_eq!(player.current_position(), 0);
        assert_eq!(player.duration_ms(), 0);
        assert!(player.video_info().is_none());
        assert_eq!(player.stats().frames_emitted, 0);
    }

    #[test]
    fn test_initialize_missing_file() {
        let mut player = Player::default();
        let (sink, _) = recording_sink();
        let err = player.initialize("/no/such/video.mp4", sink).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::DecoderOpen(DecoderOpenError::NotFound(_))
        ));
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[test]
    fn test_play_pause_seek_resume() {
        let mut player = Player::default();
        let (sink, shown) = recording_sink();
        player.initialize_with(pattern(10_000), sink).unwrap();
        assert_eq!(player.state(), PlayerState::Initialized);
        assert_eq!(player.duration_ms(), 10_000);

        // First frame previewed before play
        assert!(wait_for(|| last_shown(&shown) == Some(0)));
        assert_eq!(player.current_position(), 0);

        let started = Instant::now();
        player.play().unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        thread::sleep(Duration::from_millis(1000));
        let position = player.current_position();
        let elapsed = started.elapsed().as_millis() as i64;
        assert!(position >= 950, "position {}", position);
        assert!((position - elapsed).abs() <= 50, "{} vs {}", position, elapsed);

        let shown_ts = last_shown(&shown).unwrap();
        assert!((position - shown_ts).abs() <= 100, "{} vs {}", shown_ts, position);

        player.pause().unwrap();
        assert_eq!(player.state(), PlayerState::Paused);
        let paused_at = player.current_position();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(player.current_position(), paused_at);
        player.pause().unwrap();
        assert_eq!(player.current_position(), paused_at);

        player.seek_to(5000).unwrap();
        assert_eq!(player.current_position(), 5000);
        assert!(wait_for(|| last_shown(&shown) == Some(5000)));
        assert_eq!(player.state(), PlayerState::Paused);

        player.play().unwrap();
        thread::sleep(Duration::from_millis(300));
        let resumed = player.current_position();
        assert!((5250..=5400).contains(&resumed), "resumed at {}", resumed);
        assert!(last_shown(&shown).unwrap() >= 5000);

        player.stop();
        assert_eq!(player.state(), PlayerState::Stopped);
        assert_eq!(player.current_position(), 0);
    }

    #[test]
    fn test_end_of_stream_pauses_then_restarts() {
        let mut player = Player::default();
        let (sink, shown) = recording_sink();
        player.initialize_with(pattern(300), sink).unwrap();
        player.play().unwrap();

        assert!(wait_for(|| player.state() == PlayerState::Paused));
        assert_eq!(player.current_position(), 300);
        assert_eq!(last_shown(&shown), Some(267));
        assert!(player.stats().end_of_stream);

        let zeros = || shown.lock().iter().filter(|(ts, _)| *ts == 0).count();
        assert_eq!(zeros(), 1);

        player.play().unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        assert!(player.current_position() < 300);
        assert!(wait_for(|| zeros() == 2));
    }

    #[test]
    fn test_paused_seek_served_from_buffer() {
        let mut player = Player::default();
        let (sink, shown) = recording_sink();
        player.initialize_with(pattern(10_000), sink).unwrap();
        assert!(wait_for(|| player.stats().buffer.buffered_frames == 200));
        let decoded = player.stats().frames_decoded;

        player.seek_to(1000).unwrap();
        // Emitted synchronously, no decoder reposition
        assert_eq!(last_shown(&shown), Some(1000));
        assert!(player.stats().frames_decoded >= decoded);
        // The worker may now recycle frames behind 1000, never the ones after
        assert!(player
            .stats()
            .buffer
            .start_time_ms
            .is_some_and(|start| start <= 1000));

        // Past the buffered range: repositioned and previewed
        player.seek_to(9000).unwrap();
        assert!(wait_for(|| last_shown(&shown) == Some(9000)));
        assert_eq!(player.current_position(), 9000);
    }

    fn near(shown: &Shown, position: i64) -> bool {
        last_shown(shown).is_some_and(|ts| (ts - position).abs() <= 100)
    }

    #[test]
    fn test_seek_while_playing() {
        let mut player = Player::default();
        let (sink, shown) = recording_sink();
        player.initialize_with(pattern(10_000), sink).unwrap();
        assert!(wait_for(|| player.stats().buffer.buffered_frames == 200));
        player.play().unwrap();
        thread::sleep(Duration::from_millis(200));

        // Forward inside the buffered range
        player.seek_to(3000).unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        thread::sleep(Duration::from_millis(300));
        let position = player.current_position();
        assert!((3250..=3500).contains(&position), "position {}", position);
        assert!(near(&shown, position), "{:?} vs {}", last_shown(&shown), position);

        // Forward past the buffer, decoder repositioned
        player.seek_to(8500).unwrap();
        assert!(wait_for(|| last_shown(&shown).is_some_and(|ts| ts >= 8500)));
        thread::sleep(Duration::from_millis(300));
        let position = player.current_position();
        assert!((8750..=9100).contains(&position), "position {}", position);
        assert!(near(&shown, position), "{:?} vs {}", last_shown(&shown), position);

        // Backward, behind everything buffered
        player.seek_to(1000).unwrap();
        assert!(wait_for(|| last_shown(&shown).is_some_and(|ts| ts < 2000)));
        thread::sleep(Duration::from_millis(300));
        let position = player.current_position();
        assert!((1250..=1600).contains(&position), "position {}", position);
        assert!(near(&shown, position), "{:?} vs {}", last_shown(&shown), position);
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn test_seek_right_after_end_keeps_playing() {
        let mut player = Player::default();
        let (sink, shown) = recording_sink();
        player.initialize_with(pattern(600), sink).unwrap();
        player.play().unwrap();

        // The loop ended on its own, no control op has observed it yet
        assert!(wait_for(|| player.shared.has_ended()));
        player.seek_to(100).unwrap();
        assert_eq!(player.state(), PlayerState::Playing);
        thread::sleep(Duration::from_millis(200));
        let position = player.current_position();
        assert!((250..=450).contains(&position), "position {}", position);
        assert!(near(&shown, position), "{:?} vs {}", last_shown(&shown), position);

        // And it still ends again
        assert!(wait_for(|| player.state() == PlayerState::Paused));
        assert_eq!(player.current_position(), 600);
    }

    #[test]
    fn test_seek_restarts_frozen_clock_while_playing() {
        let mut player = Player::default();
        let (sink, _) = recording_sink();
        player.initialize_with(pattern(10_000), sink).unwrap();
        player.play().unwrap();

        // Clock already stopped at the end when the seek comes in
        player.clock.pause_at(10_000);
        player.seek_to(2000).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(player.state(), PlayerState::Playing);
        let position = player.current_position();
        assert!((2250..=2500).contains(&position), "position {}", position);
    }

    #[test]
    fn test_seek_clamps() {
        let mut player = Player::default();
        let (sink, _) = recording_sink();
        player.initialize_with(pattern(2000), sink).unwrap();

        player.seek_to(-100).unwrap();
        assert_eq!(player.current_position(), 0);
        player.seek_to(99_999).unwrap();
        assert_eq!(player.current_position(), 2000);
    }

    #[test]
    fn test_rotation_reaches_sink() {
        let mut player = Player::default();
        let (sink, shown) = recording_sink();
        let decoder = TestPatternDecoder::new(1000, 30.0, 16, 16).with_rotation(Rotation::Cw270);
        player.initialize_with(Box::new(decoder), sink).unwrap();
        assert!(wait_for(|| !shown.lock().is_empty()));
        assert_eq!(shown.lock()[0].1, Rotation::Cw270);
        assert_eq!(player.video_info().unwrap().rotation, Rotation::Cw270);
    }

    #[test]
    fn test_reinitialize_replaces_session() {
        let mut player = Player::default();
        let (sink, _) = recording_sink();
        player.initialize_with(pattern(1000), Arc::clone(&sink)).unwrap();
        player.play().unwrap();
        player.initialize_with(pattern(4000), sink).unwrap();
        assert_eq!(player.state(), PlayerState::Initialized);
        assert_eq!(player.duration_ms(), 4000);
        assert_eq!(player.current_position(), 0);
    }
}
