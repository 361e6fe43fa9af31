use super::background::BackgroundCache;
use crate::error::{MattingError, MattingResult};
use crate::frame::{encode_rgb, encode_rgba, FrameEncoding};
use crate::segmentation::AlphaMask;
use image::imageops::FilterType;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;

/// Neutral colour edge pixels are pulled towards
pub const MID_GRAY: [u8; 3] = [128, 128, 128];

/// Alpha strictly between these is considered semi-transparent
const SEMI_TRANSPARENT: (f32, f32) = (0.0, 1.0);

/// Make the mask match the image, resizing once if needed
pub fn resolve_mask(mask: AlphaMask, width: u32, height: u32) -> MattingResult<AlphaMask> {
    if mask.dimensions() == (width, height) {
        return Ok(mask);
    }

    tracing::debug!(
        "Resizing mask {}x{} to {}x{}",
        mask.width(),
        mask.height(),
        width,
        height
    );
    let resized = mask.resize(width, height, FilterType::Triangle);
    if resized.dimensions() != (width, height) || resized.as_slice().is_empty() {
        return Err(MattingError::DimensionMismatch {
            mask_width: resized.width(),
            mask_height: resized.height(),
            image_width: width,
            image_height: height,
        });
    }
    Ok(resized)
}

/// Pull a semi-transparent pixel towards mid grey to remove background bleed
#[inline]
pub fn decontaminate(pixel: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    if alpha <= SEMI_TRANSPARENT.0 || alpha >= SEMI_TRANSPARENT.1 {
        return pixel;
    }
    Rgb(std::array::from_fn(|c| {
        let v = f32::from(pixel[c]) * alpha + f32::from(MID_GRAY[c]) * (1.0 - alpha);
        v.round().clamp(0.0, 255.0) as u8
    }))
}

fn check_dimensions(image: &RgbImage, mask: &AlphaMask) -> MattingResult<()> {
    if image.dimensions() != mask.dimensions() {
        return Err(MattingError::DimensionMismatch {
            mask_width: mask.width(),
            mask_height: mask.height(),
            image_width: image.width(),
            image_height: image.height(),
        });
    }
    Ok(())
}

/// `fg * a + bg * (1 - a)` after decontamination
pub fn composite(
    image: &RgbImage,
    mask: &AlphaMask,
    background: &RgbImage,
) -> MattingResult<RgbImage> {
    check_dimensions(image, mask)?;
    if background.dimensions() != image.dimensions() {
        return Err(MattingError::DimensionMismatch {
            mask_width: background.width(),
            mask_height: background.height(),
            image_width: image.width(),
            image_height: image.height(),
        });
    }

    Ok(RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let a = mask.get(x, y).unwrap_or(0.0).clamp(0.0, 1.0);
        let fg = decontaminate(*image.get_pixel(x, y), a);
        let bg = background.get_pixel(x, y);
        Rgb(std::array::from_fn(|c| {
            let v = f32::from(fg[c]) * a + f32::from(bg[c]) * (1.0 - a);
            v.round().clamp(0.0, 255.0) as u8
        }))
    }))
}

/// Foreground with the matte as its alpha channel
pub fn compose_transparent(image: &RgbImage, mask: &AlphaMask) -> MattingResult<RgbaImage> {
    check_dimensions(image, mask)?;

    Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let a = mask.get(x, y).unwrap_or(0.0).clamp(0.0, 1.0);
        let fg = decontaminate(*image.get_pixel(x, y), a);
        Rgba([fg[0], fg[1], fg[2], (a * 255.0).round() as u8])
    }))
}

/// Result of rendering a matte
#[derive(Debug, Clone)]
pub enum Rendered {
    Opaque(RgbImage),
    Transparent(RgbaImage),
    /// No background and no alpha-capable output: the frame as-is
    Unchanged,
}

/// Blends matted foregrounds over the cached background
///
/// Clones share one [`BackgroundCache`], so the streaming and still paths
/// hold a single decoded background between them.
#[derive(Default, Clone)]
pub struct Compositor {
    backgrounds: Arc<BackgroundCache>,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(backgrounds: Arc<BackgroundCache>) -> Self {
        Self { backgrounds }
    }

    pub fn backgrounds(&self) -> &Arc<BackgroundCache> {
        &self.backgrounds
    }

    /// Composite `image` using `mask` over `background`
    ///
    /// Without a background the foreground is emitted with transparency when
    /// `alpha_capable`, otherwise the image is left unchanged.
    pub fn render(
        &self,
        image: &RgbImage,
        mask: AlphaMask,
        background: Option<&Path>,
        alpha_capable: bool,
    ) -> MattingResult<Rendered> {
        let _span = tracing::debug_span!("composite").entered();
        let (width, height) = image.dimensions();
        let mask = resolve_mask(mask, width, height)?;

        match background {
            Some(path) => {
                let background = self.backgrounds.get(path, width, height);
                Ok(Rendered::Opaque(composite(image, &mask, &background)?))
            }
            None if alpha_capable => Ok(Rendered::Transparent(compose_transparent(image, &mask)?)),
            None => Ok(Rendered::Unchanged),
        }
    }

    /// Render and encode into `encoding`
    pub fn render_encoded(
        &self,
        image: &RgbImage,
        mask: AlphaMask,
        background: Option<&Path>,
        encoding: FrameEncoding,
        jpeg_quality: u8,
    ) -> MattingResult<Vec<u8>> {
        match self.render(image, mask, background, encoding.supports_alpha())? {
            Rendered::Opaque(rgb) => encode_rgb(&rgb, encoding, jpeg_quality),
            Rendered::Transparent(rgba) => encode_rgba(&rgba, encoding, jpeg_quality),
            Rendered::Unchanged => encode_rgb(image, encoding, jpeg_quality),
        }
    }
}
