//! Chooses what the avatar window shows for each playback state.
//!
//! A new random image is picked when playback starts and kept until it
//! stops. Idle and any load failure show the placeholder.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use super::compose::{list_images, load_composited};
use crate::error::AvatarError;
use crate::speech::playback::PlaybackState;

#[derive(Debug, Clone)]
pub enum AvatarFrame {
    /// `id` changes whenever a different image is chosen.
    Avatar { id: u64, image: Arc<RgbImage> },
    Placeholder,
}

pub struct AvatarSelector {
    image_dir: PathBuf,
    background: [u8; 3],
    was_playing: bool,
    current: Option<(u64, Arc<RgbImage>)>,
    picks: u64,
}

impl AvatarSelector {
    pub fn new(image_dir: PathBuf, background: [u8; 3]) -> Self {
        Self {
            image_dir,
            background,
            was_playing: false,
            current: None,
            picks: 0,
        }
    }

    pub fn background(&self) -> [u8; 3] {
        self.background
    }

    pub fn next_frame(&mut self, state: PlaybackState) -> AvatarFrame {
        let starting = state.is_playing && !self.was_playing;
        self.was_playing = state.is_playing;

        if !state.is_playing {
            self.current = None;
            return AvatarFrame::Placeholder;
        }

        if starting {
            debug!("Playback started ({:.1}s), choosing avatar", state.duration_secs);
            self.current = match self.pick_image() {
                Ok(image) => {
                    self.picks += 1;
                    Some((self.picks, Arc::new(image)))
                }
                Err(e) => {
                    warn!("Failed to load avatar image: {e}");
                    None
                }
            };
        }

        match &self.current {
            Some((id, image)) => AvatarFrame::Avatar {
                id: *id,
                image: image.clone(),
            },
            None => AvatarFrame::Placeholder,
        }
    }

    fn pick_image(&self) -> Result<RgbImage, AvatarError> {
        let images = list_images(&self.image_dir)?;
        let path = images
            .choose(&mut rand::rng())
            .ok_or_else(|| AvatarError::NoImages(self.image_dir.clone()))?;
        load_composited(path, self.background)
    }
}
