//! # cutframe core
//!
//! Decode-ahead video playback for the cutframe trimmer: a file goes in, timed
//! RGBA frames come out to a display sink, with play / pause / seek.

// ============================================================================
// Frames
// ============================================================================
pub mod frame;
pub mod frame_buffer;

// ============================================================================
// Container / Codec
// ============================================================================
pub mod demux;
pub mod pixel;
#[cfg(feature = "software-decode")]
pub mod h264;
pub mod decoder;

// ============================================================================
// Pipeline
// ============================================================================
pub mod worker;
pub mod clock;
pub mod prefetch;
pub mod playback;
pub mod player;

// ============================================================================
// Settings
// ============================================================================
pub mod config;

pub use clock::{ManualTime, PlaybackClock, SystemTime, TimeSource};
pub use config::{ConfigError, PlayerConfig};
pub use decoder::{
    open_decoder, DecodeFrameError, DecoderOpenError, Grab, TestPatternDecoder, VideoDecoder,
    VideoInfo,
};
#[cfg(feature = "software-decode")]
pub use decoder::Mp4Decoder;
pub use demux::Codec;
pub use frame::{Frame, FrameSink, Rotation};
pub use frame_buffer::{BufferStats, TimestampFrameBuffer};
pub use player::{PlaybackStats, Player, PlayerError, PlayerState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
