//! # Timestamp Frame Buffer
//!
//! Ordered store of decoded frames keyed by presentation timestamp:
//! - Decode-ahead storage filled by the prefetch worker
//! - Exact / closest / next lookups for the playback loop
//! - Bounded capacity, oldest timestamps evicted first
//! - Eviction check so the producer can back off instead of
//!   destroying frames the clock still needs
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  append   ┌──────────────────────┐  closest   ┌──────────────┐
//! │ Prefetcher │──────────►│ TimestampFrameBuffer │───────────►│ PlaybackLoop │
//! │  (decode)  │           │  BTreeMap<ms, Frame> │◄───────────│   (timer)    │
//! └────────────┘           └──────────────────────┘  discard   └──────────────┘
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::frame::Frame;

/// Default number of frames kept in memory (~6.6 s at 30 fps).
pub const DEFAULT_CAPACITY: usize = 200;

// ============================================================================
// Buffer State
// ============================================================================

struct Inner {
    frames: BTreeMap<i64, Frame>,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

impl Inner {
    fn refresh_range(&mut self) {
        self.start_time = self.frames.keys().next().copied();
        self.end_time = self.frames.keys().next_back().copied();
    }
}

// ============================================================================
// Timestamp Frame Buffer
// ============================================================================

/// Thread-safe timestamp-indexed frame store.
///
/// One mutex guards the map and its cached range, so a writer (prefetch) and a
/// reader (playback) always observe a consistent view.
pub struct TimestampFrameBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    /// Reject closest matches further than this (milliseconds)
    tolerance_ms: Option<i64>,

    appended: AtomicU64,
    evicted: AtomicU64,
    discarded: AtomicU64,
}

impl TimestampFrameBuffer {
    /// Capacity is at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: BTreeMap::new(),
                start_time: None,
                end_time: None,
            }),
            capacity: capacity.max(1),
            tolerance_ms: None,
            appended: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Only accept closest matches within `tolerance_ms` of the query.
    pub fn with_tolerance(mut self, tolerance_ms: Option<i64>) -> Self {
        self.tolerance_ms = tolerance_ms.map(|t| t.max(0));
        self
    }

    // ========================================================================
    // Producer API
    // ========================================================================

    /// Insert (or overwrite) a frame, evicting the oldest entries past capacity.
    pub fn append(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        inner.frames.insert(frame.timestamp_ms(), frame);
        self.appended.fetch_add(1, Ordering::Relaxed);

        while inner.frames.len() > self.capacity {
            if inner.frames.pop_first().is_some() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.refresh_range();
    }

    /// True when the next append would evict a frame at or after `protected_ms`.
    pub fn would_evict_at_or_after(&self, protected_ms: i64) -> bool {
        let inner = self.inner.lock();
        if inner.frames.len() < self.capacity {
            return false;
        }
        inner.start_time.is_some_and(|start| start >= protected_ms)
    }

    // ========================================================================
    // Consumer API
    // ========================================================================

    pub fn exact(&self, timestamp_ms: i64) -> Option<Frame> {
        self.inner.lock().frames.get(&timestamp_ms).cloned()
    }

    /// Nearest frame to `timestamp_ms`; on a tie the earlier frame wins.
    pub fn closest(&self, timestamp_ms: i64) -> Option<Frame> {
        let inner = self.inner.lock();
        if let Some(frame) = inner.frames.get(&timestamp_ms) {
            return Some(frame.clone());
        }

        let lower = inner.frames.range(..timestamp_ms).next_back();
        let higher = inner.frames.range((Excluded(timestamp_ms), Unbounded)).next();

        let (key, frame) = match (lower, higher) {
            (Some(lo), Some(hi)) => {
                if timestamp_ms - lo.0 <= hi.0 - timestamp_ms {
                    lo
                } else {
                    hi
                }
            }
            (Some(lo), None) => lo,
            (None, Some(hi)) => hi,
            (None, None) => return None,
        };

        match self.tolerance_ms {
            Some(tolerance) if (key - timestamp_ms).abs() > tolerance => None,
            _ => Some(frame.clone()),
        }
    }

    /// Smallest timestamp strictly greater than `timestamp_ms`.
    pub fn next(&self, timestamp_ms: i64) -> Option<Frame> {
        self.inner
            .lock()
            .frames
            .range((Excluded(timestamp_ms), Unbounded))
            .next()
            .map(|(_, frame)| frame.clone())
    }

    /// Drop every frame strictly older than `timestamp_ms`. Returns how many went.
    pub fn discard_before(&self, timestamp_ms: i64) -> usize {
        let mut inner = self.inner.lock();
        let kept = inner.frames.split_off(&timestamp_ms);
        let removed = inner.frames.len();
        inner.frames = kept;
        if removed > 0 {
            inner.refresh_range();
            self.discarded.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    // ========================================================================
    // Control API
    // ========================================================================

    /// Empty the store. The decoder is left alone.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.start_time = None;
        inner.end_time = None;
    }

    // ========================================================================
    // Status API
    // ========================================================================

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Smallest buffered timestamp, `None` when empty.
    pub fn start_time(&self) -> Option<i64> {
        self.inner.lock().start_time
    }

    /// Largest buffered timestamp, `None` when empty.
    pub fn end_time(&self) -> Option<i64> {
        self.inner.lock().end_time
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            buffered_frames: inner.frames.len(),
            capacity: self.capacity,
            start_time_ms: inner.start_time,
            end_time_ms: inner.end_time,
            frames_appended: self.appended.load(Ordering::Relaxed),
            frames_evicted: self.evicted.load(Ordering::Relaxed),
            frames_discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Default for TimestampFrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    pub buffered_frames: usize,
    pub capacity: usize,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
    pub frames_appended: u64,
    pub frames_evicted: u64,
    pub frames_discarded: u64,
}

// ============================================================================
// Tests
// ============================================================================
