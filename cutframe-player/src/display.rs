// Display sink: the playback worker drops upright pictures here, the UI
// thread picks up the newest one on its next repaint.

use cutframe_core::{Frame, FrameSink, Rotation};
use eframe::egui;
use image::{imageops, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;

/// A picture ready to upload, already rotated upright.
#[derive(Clone)]
pub struct Picture {
    pub image: Arc<RgbaImage>,
    pub timestamp_ms: i64,
}

pub struct DisplaySlot {
    pending: Mutex<Option<Picture>>,
    latest: Mutex<Option<Picture>>,
    repaint: Option<egui::Context>,
}

impl DisplaySlot {
    pub fn new(repaint: Option<egui::Context>) -> Self {
        Self {
            pending: Mutex::new(None),
            latest: Mutex::new(None),
            repaint,
        }
    }

    /// Newest picture not yet taken by the UI.
    pub fn take(&self) -> Option<Picture> {
        self.pending.lock().take()
    }

    /// Newest picture ever shown, taken or not.
    pub fn latest(&self) -> Option<Picture> {
        self.latest.lock().clone()
    }
}

impl FrameSink for DisplaySlot {
    fn on_frame(&self, frame: &Frame, rotation: Rotation) {
        let picture = Picture {
            image: upright(frame, rotation),
            timestamp_ms: frame.timestamp_ms(),
        };
        *self.latest.lock() = Some(picture.clone());
        *self.pending.lock() = Some(picture);
        if let Some(ctx) = &self.repaint {
            ctx.request_repaint();
        }
    }
}

pub fn upright(frame: &Frame, rotation: Rotation) -> Arc<RgbaImage> {
    let image = frame.image();
    match rotation {
        Rotation::None => frame.shared_image(),
        Rotation::Cw90 => Arc::new(imageops::rotate90(image)),
        Rotation::Cw180 => Arc::new(imageops::rotate180(image)),
        Rotation::Cw270 => Arc::new(imageops::rotate270(image)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn marked_frame() -> Frame {
        // 3x2, red in the top-left corner
        let mut image = RgbaImage::new(3, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        Frame::new(image, 40)
    }

    #[test]
    fn test_upright_rotations() {
        let frame = marked_frame();

        let same = upright(&frame, Rotation::None);
        assert!(Arc::ptr_eq(&same, &frame.shared_image()));

        let cw90 = upright(&frame, Rotation::Cw90);
        assert_eq!(cw90.dimensions(), (2, 3));
        assert_eq!(cw90.get_pixel(1, 0).0, [255, 0, 0, 255]);

        let cw180 = upright(&frame, Rotation::Cw180);
        assert_eq!(cw180.dimensions(), (3, 2));
        assert_eq!(cw180.get_pixel(2, 1).0, [255, 0, 0, 255]);

        let cw270 = upright(&frame, Rotation::Cw270);
        assert_eq!(cw270.dimensions(), (2, 3));
        assert_eq!(cw270.get_pixel(0, 2).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_slot_keeps_newest() {
        let slot = DisplaySlot::new(None);
        assert!(slot.take().is_none());

        slot.on_frame(&marked_frame(), Rotation::Cw90);
        slot.on_frame(&Frame::new(RgbaImage::new(3, 2), 73), Rotation::Cw90);

        let picture = slot.take().unwrap();
        assert_eq!(picture.timestamp_ms, 73);
        assert_eq!(picture.image.dimensions(), (2, 3));
        assert!(slot.take().is_none());
        assert_eq!(slot.latest().unwrap().timestamp_ms, 73);
    }
}
