use super::CaptureSource;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use livematte::Frame;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;
        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let native = camera.resolution();
        tracing::info!(
            "Webcam streaming at {}x{}",
            native.width(),
            native.height()
        );

        Ok(Self {
            camera,
            width,
            height,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Frame> {
        let buffer = self.camera.frame().context("Failed to capture frame")?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        // The camera may not offer the requested mode exactly
        let image = if decoded.dimensions() == (self.width, self.height) {
            decoded
        } else {
            imageops::resize(&decoded, self.width, self.height, FilterType::Triangle)
        };

        Ok(Frame::from_rgb(image))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
