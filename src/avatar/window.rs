//! egui window that shows the avatar while the bot is speaking.
//!
//! Repaints continuously and polls the playback cell every frame. Closes on
//! `q` or when the window is closed.

use std::sync::Arc;

use egui::load::SizedTexture;
use egui::{Color32, ColorImage, TextureHandle, TextureOptions};
use image::RgbImage;
use tracing::info;

use super::compose::placeholder;
use super::selector::{AvatarFrame, AvatarSelector};
use crate::config::AvatarConfig;
use crate::speech::playback::PlaybackCell;

struct AvatarWindow {
    selector: AvatarSelector,
    playback: Arc<PlaybackCell>,
    avatar: Option<(u64, TextureHandle)>,
    placeholder: Option<TextureHandle>,
}

fn color_image(image: &RgbImage) -> ColorImage {
    ColorImage::from_rgb([image.width() as usize, image.height() as usize], image.as_raw())
}

impl AvatarWindow {
    /// Texture for `frame`, uploading only when the avatar image changed.
    fn texture_for(&mut self, ctx: &egui::Context, frame: AvatarFrame) -> TextureHandle {
        match frame {
            AvatarFrame::Avatar { id, image } => {
                if let Some((cached, handle)) = &self.avatar {
                    if *cached == id {
                        return handle.clone();
                    }
                }
                let handle =
                    ctx.load_texture("avatar", color_image(&image), TextureOptions::LINEAR);
                self.avatar = Some((id, handle.clone()));
                handle
            }
            AvatarFrame::Placeholder => {
                let background = self.selector.background();
                self.placeholder
                    .get_or_insert_with(|| {
                        ctx.load_texture(
                            "placeholder",
                            color_image(&placeholder(background)),
                            TextureOptions::LINEAR,
                        )
                    })
                    .clone()
            }
        }
    }
}

impl eframe::App for AvatarWindow {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.key_pressed(egui::Key::Q)) {
            info!("Quit key pressed, closing avatar window");
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        let [r, g, b] = self.selector.background();
        let frame = self.selector.next_frame(self.playback.get());
        let texture = SizedTexture::from_handle(&self.texture_for(ctx, frame));

        egui::CentralPanel::default()
            .frame(egui::Frame::new().fill(Color32::from_rgb(r, g, b)))
            .show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.add(egui::Image::from_texture(texture).shrink_to_fit());
                });
            });

        ctx.request_repaint();
    }
}

/// Run the avatar window on the current thread until it is closed.
pub fn run(config: &AvatarConfig, playback: Arc<PlaybackCell>) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(config.window_title.clone())
            .with_inner_size([config.width, config.height]),
        ..Default::default()
    };

    let app = AvatarWindow {
        selector: AvatarSelector::new(config.image_dir.clone(), config.background),
        playback,
        avatar: None,
        placeholder: None,
    };

    info!("Opening avatar window ({})", config.image_dir.display());
    eframe::run_native(&config.window_title, options, Box::new(move |_cc| Ok(Box::new(app))))
}
