//! Image loading and compositing onto the chroma background.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};

use crate::error::AvatarError;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Width and height of the idle frame.
pub const PLACEHOLDER_SIZE: (u32, u32) = (1280, 720);

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, AvatarError> {
    let entries = fs::read_dir(dir).map_err(|source| AvatarError::ListDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut images: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect();
    images.sort();
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Flatten an image onto a solid background: `out = rgb*alpha + bg*(1-alpha)`.
/// Images without an alpha channel are converted as-is.
pub fn composite(image: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let alpha = f32::from(src[3]) / 255.0;
        let blend =
            |c: u8, bg: u8| (f32::from(c) * alpha + f32::from(bg) * (1.0 - alpha)).round() as u8;
        *dst = Rgb([
            blend(src[0], background[0]),
            blend(src[1], background[1]),
            blend(src[2], background[2]),
        ]);
    }
    out
}

pub fn load_composited(path: &Path, background: [u8; 3]) -> Result<RgbImage, AvatarError> {
    let image = image::open(path).map_err(|source| AvatarError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(composite(&image, background))
}

pub fn placeholder(background: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(PLACEHOLDER_SIZE.0, PLACEHOLDER_SIZE.1, Rgb(background))
}
