use super::compositor::MID_GRAY;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Resize to cover `width`x`height`, centre-crop the excess, pad if short
pub fn cover_crop(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (iw, ih) = image.dimensions();
    if width == 0 || height == 0 || iw == 0 || ih == 0 {
        return solid_background(width, height);
    }

    let scale = (f64::from(width) / f64::from(iw)).max(f64::from(height) / f64::from(ih));
    let sw = ((f64::from(iw) * scale).round() as u32).max(1);
    let sh = ((f64::from(ih) * scale).round() as u32).max(1);
    let scaled = if (sw, sh) == (iw, ih) {
        image.clone()
    } else {
        imageops::resize(image, sw, sh, FilterType::CatmullRom)
    };

    let cw = sw.min(width);
    let ch = sh.min(height);
    let cropped = imageops::crop_imm(&scaled, (sw - cw) / 2, (sh - ch) / 2, cw, ch).to_image();
    if (cw, ch) == (width, height) {
        return cropped;
    }

    // Rounding left us a pixel short; centre on a neutral canvas
    let mut canvas = solid_background(width, height);
    imageops::overlay(
        &mut canvas,
        &cropped,
        i64::from((width - cw) / 2),
        i64::from((height - ch) / 2),
    );
    canvas
}

/// Stand-in for a missing or unreadable background
pub fn solid_background(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(MID_GRAY))
}

struct CachedBackground {
    path: PathBuf,
    width: u32,
    height: u32,
    image: RgbImage,
}

/// Single-entry cache of the decoded, cover-cropped background
///
/// Keyed by `(path, width, height)`. Callers always receive their own copy.
#[derive(Default)]
pub struct BackgroundCache {
    entry: Mutex<Option<CachedBackground>>,
    loads: AtomicUsize,
}

impl BackgroundCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path, width: u32, height: u32) -> RgbImage {
        let mut entry = self.entry.lock();

        if let Some(cached) = entry.as_ref() {
            if cached.path == path && cached.width == width && cached.height == height {
                return cached.image.clone();
            }
        }

        let image = load_cover(path, width, height);
        self.loads.fetch_add(1, Ordering::Relaxed);
        *entry = Some(CachedBackground {
            path: path.to_path_buf(),
            width,
            height,
            image: image.clone(),
        });
        image
    }

    /// Number of cache misses so far
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}

fn load_cover(path: &Path, width: u32, height: u32) -> RgbImage {
    let _span = tracing::debug_span!("load_background").entered();
    match image::open(path) {
        Ok(decoded) => {
            tracing::debug!(
                "Loaded background {} ({}x{}) for {}x{}",
                path.display(),
                decoded.width(),
                decoded.height(),
                width,
                height
            );
            cover_crop(&decoded.to_rgb8(), width, height)
        }
        Err(e) => {
            tracing::warn!(
                "Background {} unavailable, using solid fill: {}",
                path.display(),
                e
            );
            solid_background(width, height)
        }
    }
}
