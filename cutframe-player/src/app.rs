// ============================================================================
// Viewer window
// ============================================================================
//
// One window, one Player. Files dropped on this window open here; there is no
// process-wide drop handler.

use cutframe_core::{FrameSink, Player, PlayerConfig, PlayerState};
use eframe::egui::{self, ColorImage, TextureHandle, TextureOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::display::{DisplaySlot, Picture};
use crate::format_time;

pub struct CutframeApp {
    player: Player,
    display: Arc<DisplaySlot>,
    video_path: Option<PathBuf>,
    error: Option<String>,
    texture: Option<TextureHandle>,
    frame_size: [usize; 2],
    shown_ms: i64,
    /// Slider position while the handle is being dragged, in seconds
    scrub_sec: Option<f64>,
}

impl CutframeApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: PlayerConfig) -> Self {
        let mut visuals = egui::Visuals::dark();
        visuals.panel_fill = egui::Color32::from_rgb(18, 18, 18);
        visuals.extreme_bg_color = egui::Color32::from_rgb(10, 10, 10);
        visuals.selection.bg_fill = egui::Color32::from_rgb(50, 100, 150);
        cc.egui_ctx.set_visuals(visuals);

        Self {
            player: Player::new(config),
            display: Arc::new(DisplaySlot::new(Some(cc.egui_ctx.clone()))),
            video_path: None,
            error: None,
            texture: None,
            frame_size: [0, 0],
            shown_ms: 0,
            scrub_sec: None,
        }
    }

    fn open_file(&mut self, path: PathBuf) {
        tracing::info!("Opening {}", path.display());
        let sink: Arc<dyn FrameSink> = self.display.clone();
        match self.player.initialize(&path, sink) {
            Ok(()) => {
                self.video_path = Some(path);
                self.error = None;
                self.texture = None;
            }
            Err(e) => {
                self.error = Some(format!("Cannot open {}: {}", path.display(), e));
            }
        }
    }

    fn toggle_play(&mut self) {
        let result = if self.player.state() == PlayerState::Playing {
            self.player.pause()
        } else {
            self.player.play()
        };
        if let Err(e) = result {
            tracing::warn!("Play/pause failed: {}", e);
        }
    }

    fn seek(&mut self, position_ms: i64) {
        if let Err(e) = self.player.seek_to(position_ms) {
            tracing::warn!("Seek failed: {}", e);
        }
    }

    fn upload(&mut self, ctx: &egui::Context, picture: Picture) {
        let size = [picture.image.width() as usize, picture.image.height() as usize];
        let image = ColorImage::from_rgba_unmultiplied(size, picture.image.as_raw());
        match &mut self.texture {
            Some(texture) if self.frame_size == size => texture.set(image, TextureOptions::LINEAR),
            _ => self.texture = Some(ctx.load_texture("video_frame", image, TextureOptions::LINEAR)),
        }
        self.frame_size = size;
        self.shown_ms = picture.timestamp_ms;
    }
}

impl eframe::App for CutframeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(picture) = self.display.take() {
            self.upload(ctx, picture);
        }
        if self.player.state() == PlayerState::Playing {
            // Keep the position label moving between frames
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("file").show(ctx, |ui| {
            ui.horizontal(|ui| {
                match &self.video_path {
                    Some(path) => ui.label(path.display().to_string()),
                    None => ui.label("No video"),
                };
                if let Some(error) = &self.error {
                    ui.colored_label(egui::Color32::from_rgb(220, 90, 90), error.as_str());
                }
            });
        });

        egui::TopBottomPanel::bottom("controls")
            .frame(
                egui::Frame::none()
                    .fill(egui::Color32::from_rgb(20, 20, 22))
                    .inner_margin(egui::Margin::symmetric(16.0, 8.0)),
            )
            .show(ctx, |ui| {
                let duration_ms = self.player.duration_ms();
                let mut position_sec = self
                    .scrub_sec
                    .unwrap_or(self.player.current_position() as f64 / 1000.0);
                let duration_sec = duration_ms as f64 / 1000.0;

                ui.spacing_mut().slider_width = ui.available_width();
                let slider = egui::Slider::new(&mut position_sec, 0.0..=duration_sec.max(0.001))
                    .show_value(false);
                let response = ui.add_enabled(duration_ms > 0, slider);
                let target = scrub_target(
                    &mut self.scrub_sec,
                    position_sec,
                    response.dragged(),
                    response.changed(),
                );
                if let Some(position_ms) = target {
                    self.seek(position_ms);
                }

                ui.horizontal(|ui| {
                    let label = if self.player.state() == PlayerState::Playing {
                        "Pause"
                    } else {
                        "Play"
                    };
                    if ui.add_enabled(duration_ms > 0, egui::Button::new(label)).clicked() {
                        self.toggle_play();
                    }
                    ui.label(format!(
                        "{} / {}",
                        format_time((position_sec * 1000.0).round() as i64),
                        format_time(duration_ms)
                    ));
                    ui.weak(format!("frame {} ms", self.shown_ms));
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            let available = ui.available_size();
            match &self.texture {
                Some(texture) => {
                    let [w, h] = self.frame_size;
                    let scale = (available.x / w.max(1) as f32).min(available.y / h.max(1) as f32);
                    let size = egui::vec2(w as f32 * scale, h as f32 * scale);
                    ui.centered_and_justified(|ui| {
                        ui.image((texture.id(), size));
                    });
                }
                None => {
                    ui.centered_and_justified(|ui| {
                        ui.label("Drop a video file here");
                    });
                }
            }
        });

        let dropped = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .find_map(|file| file.path.clone())
        });
        if let Some(path) = dropped {
            self.open_file(path);
        }

        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            self.toggle_play();
        }
    }
}

/// Seek target for a slider interaction. A drag only moves the handle; the
/// seek is issued once, on release. Clicks and key presses seek at once.
fn scrub_target(
    scrub_sec: &mut Option<f64>,
    value_sec: f64,
    dragging: bool,
    changed: bool,
) -> Option<i64> {
    let to_ms = |sec: f64| (sec * 1000.0).round() as i64;
    if dragging {
        *scrub_sec = Some(value_sec);
        return None;
    }
    match scrub_sec.take() {
        Some(_) => Some(to_ms(value_sec)),
        None if changed => Some(to_ms(value_sec)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drag_seeks_once_on_release() {
        let mut scrub = None;
        for value in [1.0, 1.5, 2.25, 3.0] {
            assert_eq!(scrub_target(&mut scrub, value, true, true), None);
        }
        assert_eq!(scrub, Some(3.0));

        assert_eq!(scrub_target(&mut scrub, 3.0, false, false), Some(3000));
        assert_eq!(scrub, None);
        assert_eq!(scrub_target(&mut scrub, 3.0, false, false), None);
    }

    #[test]
    fn test_click_seeks_immediately() {
        let mut scrub = None;
        assert_eq!(scrub_target(&mut scrub, 4.2004, false, true), Some(4200));
        assert_eq!(scrub_target(&mut scrub, 4.2004, false, false), None);
        assert_eq!(scrub, None);
    }
}
