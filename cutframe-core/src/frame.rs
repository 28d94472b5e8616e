//! Decoded frames as they travel from the decoder to the display.

use image::RgbaImage;
use std::fmt;
use std::sync::Arc;

/// Clockwise rotation the display must apply to show a picture upright.
///
/// Read once from container metadata. A phone recording held in portrait is
/// usually stored landscape with `Cw90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Snap an arbitrary angle (degrees, clockwise) to the nearest quarter turn.
    pub fn from_degrees(degrees: f64) -> Self {
        let quarter = (degrees / 90.0).round() as i64;
        match quarter.rem_euclid(4) {
            1 => Rotation::Cw90,
            2 => Rotation::Cw180,
            3 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Whether width and height trade places once rotated upright.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// One decoded picture plus its presentation timestamp.
///
/// Frames are immutable. Cloning shares the picture, so the buffer can hand
/// copies to the display without the two ever touching the same pixels mutably.
#[derive(Clone)]
pub struct Frame {
    image: Arc<RgbaImage>,
    timestamp_ms: i64,
}

impl Frame {
    /// Negative timestamps are clamped to 0.
    pub fn new(image: RgbaImage, timestamp_ms: i64) -> Self {
        Self {
            image: Arc::new(image),
            timestamp_ms: timestamp_ms.max(0),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Shared handle to the picture, for sinks that keep it past the callback.
    pub fn shared_image(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.image)
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("timestamp_ms", &self.timestamp_ms)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// Receiver of emitted frames, owned by the display layer.
///
/// Called from the playback worker, never from the UI thread. Implementations
/// should hand the picture over and return quickly.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &Frame, rotation: Rotation);
}

impl<F> FrameSink for F
where
    F: Fn(&Frame, Rotation) + Send + Sync,
{
    fn on_frame(&self, frame: &Frame, rotation: Rotation) {
        self(frame, rotation)
    }
}
