use super::OutputSink;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use livematte::Frame;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// v4l2loopback sink fed with YUYV frames
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the format so readers see YUYV at our resolution. A
        // loopback device that is already configured may refuse; frames are
        // written regardless.
        match Device::with_path(path) {
            Ok(device) => {
                let format = Format::new(width, height, FourCC::new(b"YUYV"));
                match Output::set_format(&device, &format) {
                    Ok(actual) => tracing::debug!("Loopback format: {}", actual),
                    Err(e) => tracing::warn!("Could not set loopback format: {}", e),
                }
            }
            Err(e) => tracing::warn!("Could not query {}: {}", path.display(), e),
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            file,
            width,
            height,
        })
    }
}

/// Pack RGB as YUV 4:2:2, chroma averaged over each pixel pair
pub(crate) fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
    let (width, height) = rgb_image.dimensions();
    let mut yuyv = Vec::with_capacity((width as usize).div_ceil(2) * 4 * height as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let left = rgb_image.get_pixel(x, y);
            let right = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                left
            };

            let (y1, u1, v1) = rgb_to_yuv(left[0], left[1], left[2]);
            let (y2, u2, v2) = rgb_to_yuv(right[0], right[1], right[2]);

            yuyv.push(y1);
            yuyv.push(((u16::from(u1) + u16::from(u2)) / 2) as u8);
            yuyv.push(y2);
            yuyv.push(((u16::from(v1) + u16::from(v2)) / 2) as u8);
        }
    }

    yuyv
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let image = frame.decode_rgb().context("Undecodable output frame")?;

        let image = if image.dimensions() != (self.width, self.height) {
            imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        } else {
            image
        };

        self.file
            .write_all(&rgb_to_yuyv(&image))
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_yuyv_is_two_bytes_per_pixel() {
        let image = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        let yuyv = rgb_to_yuyv(&image);
        assert_eq!(yuyv.len(), 4 * 2 * 2);
        assert_eq!(&yuyv[..4], &[0, 128, 0, 128]);
    }

    #[test]
    fn test_odd_width_repeats_last_pixel() {
        let image = RgbImage::from_pixel(3, 1, Rgb([0, 0, 0]));
        assert_eq!(rgb_to_yuyv(&image), vec![0, 128, 0, 128, 0, 128, 0, 128]);
    }
}
