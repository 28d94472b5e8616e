//! Playback Clock
//!
//! Wall clock to video timestamp. While running,
//! `position = anchor_position + (now - anchor)`, which is the same as
//! `now - video_start` without ever subtracting from an `Instant`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where "now" comes from. Tests drive a [`ManualTime`].
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Time that only moves when told to.
#[derive(Debug)]
pub struct ManualTime {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    anchor: Instant,
    anchor_position: i64,
    running: bool,
}

pub struct PlaybackClock {
    time: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
}

impl PlaybackClock {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        let anchor = time.now();
        Self {
            time,
            state: Mutex::new(ClockState {
                anchor,
                anchor_position: 0,
                running: false,
            }),
        }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemTime))
    }

    fn position_at(state: &ClockState, now: Instant) -> i64 {
        if !state.running {
            return state.anchor_position;
        }
        let elapsed = now.saturating_duration_since(state.anchor);
        state
            .anchor_position
            .saturating_add(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
    }

    /// Current target timestamp in ms.
    pub fn position_ms(&self) -> i64 {
        let now = self.time.now();
        Self::position_at(&self.state.lock(), now)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start or resume from the current position. No-op when running.
    pub fn play(&self) {
        let now = self.time.now();
        let mut state = self.state.lock();
        if !state.running {
            state.anchor = now;
            state.running = true;
        }
    }

    /// Freeze at the current position. Idempotent.
    pub fn pause(&self) {
        let now = self.time.now();
        let mut state = self.state.lock();
        if state.running {
            state.anchor_position = Self::position_at(&state, now);
            state.running = false;
        }
    }

    /// Freeze at an explicit position.
    pub fn pause_at(&self, position_ms: i64) {
        let now = self.time.now();
        let mut state = self.state.lock();
        state.anchor = now;
        state.anchor_position = position_ms.max(0);
        state.running = false;
    }

    /// Jump to `position_ms`, keeping the running/paused state.
    pub fn seek(&self, position_ms: i64) {
        let now = self.time.now();
        let mut state = self.state.lock();
        state.anchor = now;
        state.anchor_position = position_ms.max(0);
    }

    /// Wall-clock instant that maps to video timestamp 0 for this session.
    pub fn video_start(&self) -> Option<Instant> {
        let now = self.time.now();
        let state = self.state.lock();
        let position = Self::position_at(&state, now);
        now.checked_sub(Duration::from_millis(u64::try_from(position).ok()?))
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_clock() -> (Arc<ManualTime>, PlaybackClock) {
        let time = Arc::new(ManualTime::new());
        let clock = PlaybackClock::new(time.clone());
        (time, clock)
    }

    #[test]
    fn test_play_advances_pause_freezes() {
        let (time, clock) = manual_clock();
        assert_eq!(clock.position_ms(), 0);
        time.advance(Duration::from_millis(500));
        assert_eq!(clock.position_ms(), 0);

        clock.play();
        time.advance(Duration::from_millis(1000));
        assert_eq!(clock.position_ms(), 1000);

        clock.pause();
        time.advance(Duration::from_millis(700));
        assert_eq!(clock.position_ms(), 1000);
        assert!(!clock.is_running());
    }

    #[test]
    fn test_pause_twice_keeps_position() {
        let (time, clock) = manual_clock();
        clock.play();
        time.advance(Duration::from_millis(320));
        clock.pause();
        time.advance(Duration::from_millis(100));
        clock.pause();
        assert_eq!(clock.position_ms(), 320);
    }

    #[test]
    fn test_seek_while_paused_and_resume() {
        let (time, clock) = manual_clock();
        clock.seek(5000);
        assert_eq!(clock.position_ms(), 5000);

        clock.play();
        time.advance(Duration::from_millis(250));
        assert_eq!(clock.position_ms(), 5250);

        // Seek while running keeps running from the new spot
        clock.seek(1000);
        time.advance(Duration::from_millis(40));
        assert_eq!(clock.position_ms(), 1040);
    }

    #[test]
    fn test_play_is_idempotent() {
        let (time, clock) = manual_clock();
        clock.play();
        time.advance(Duration::from_millis(100));
        clock.play();
        time.advance(Duration::from_millis(100));
        assert_eq!(clock.position_ms(), 200);
    }

    #[test]
    fn test_pause_at_and_video_start() {
        let (time, clock) = manual_clock();
        time.advance(Duration::from_secs(10));
        clock.play();
        time.advance(Duration::from_millis(1500));
        let start = clock.video_start().unwrap();
        assert_eq!(time.now() - start, Duration::from_millis(1500));

        clock.pause_at(-3);
        assert_eq!(clock.position_ms(), 0);
        clock.pause_at(9000);
        assert_eq!(clock.position_ms(), 9000);
    }
}
