//! Frame buffers exchanged with capture and display collaborators

use crate::error::{MattingError, MattingResult};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;

/// How the bytes of a [`Frame`] are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameEncoding {
    /// Packed 8-bit RGB, row-major, no padding
    Rgb8,
    /// Packed 8-bit RGBA, row-major, no padding
    Rgba8,
    Jpeg,
    Png,
}

impl FrameEncoding {
    /// Whether output in this family can carry an alpha channel
    pub fn supports_alpha(self) -> bool {
        matches!(self, FrameEncoding::Rgba8 | FrameEncoding::Png)
    }
}

/// A frame submitted by the caller: pixel bytes plus geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub encoding: FrameEncoding,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, encoding: FrameEncoding) -> Self {
        Self {
            data,
            width,
            height,
            encoding,
        }
    }

    /// Wrap a decoded RGB image
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, FrameEncoding::Rgb8)
    }

    /// Decode into an RGB image regardless of encoding
    pub fn decode_rgb(&self) -> MattingResult<RgbImage> {
        let image = match self.encoding {
            FrameEncoding::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .ok_or_else(|| self.size_error(3))?,
            FrameEncoding::Rgba8 => {
                let rgba = RgbaImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(|| self.size_error(4))?;
                DynamicImage::ImageRgba8(rgba).to_rgb8()
            }
            FrameEncoding::Jpeg => {
                image::load_from_memory_with_format(&self.data, ImageFormat::Jpeg)?.to_rgb8()
            }
            FrameEncoding::Png => {
                image::load_from_memory_with_format(&self.data, ImageFormat::Png)?.to_rgb8()
            }
        };

        if image.dimensions() != (self.width, self.height) {
            return Err(MattingError::InvalidFrame(format!(
                "decoded {}x{}, announced {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }

        Ok(image)
    }

    fn size_error(&self, channels: usize) -> MattingError {
        MattingError::InvalidFrame(format!(
            "{} bytes cannot hold {}x{}x{}",
            self.data.len(),
            self.width,
            self.height,
            channels
        ))
    }
}

/// Encode an RGB image into the given encoding family
pub fn encode_rgb(image: &RgbImage, encoding: FrameEncoding, jpeg_quality: u8) -> MattingResult<Vec<u8>> {
    match encoding {
        FrameEncoding::Rgb8 => Ok(image.as_raw().clone()),
        FrameEncoding::Rgba8 => Ok(DynamicImage::ImageRgb8(image.clone()).to_rgba8().into_raw()),
        FrameEncoding::Jpeg => {
            let mut buf = Vec::new();
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality.clamp(1, 100)).encode_image(image)?;
            Ok(buf)
        }
        FrameEncoding::Png => {
            let mut buf = Cursor::new(Vec::new());
            image.write_to(&mut buf, ImageFormat::Png)?;
            Ok(buf.into_inner())
        }
    }
}

/// Encode an RGBA image; families without alpha drop the channel
pub fn encode_rgba(image: &RgbaImage, encoding: FrameEncoding, jpeg_quality: u8) -> MattingResult<Vec<u8>> {
    match encoding {
        FrameEncoding::Rgba8 => Ok(image.as_raw().clone()),
        FrameEncoding::Png => {
            let mut buf = Cursor::new(Vec::new());
            image.write_to(&mut buf, ImageFormat::Png)?;
            Ok(buf.into_inner())
        }
        FrameEncoding::Rgb8 | FrameEncoding::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            encode_rgb(&rgb, encoding, jpeg_quality)
        }
    }
}
