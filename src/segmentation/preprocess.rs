use super::types::AlphaMask;
use crate::error::{MattingError, MattingResult};
use crate::models::Normalization;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array4, ArrayD};

/// Converts RGB images to model input tensors and model outputs back
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    normalization: Normalization,
    filter: FilterType,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, normalization: Normalization) -> Self {
        Self {
            target_width,
            target_height,
            normalization,
            filter: FilterType::Lanczos3,
        }
    }

    /// Resampling filter used when the source size differs
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Normalize each channel with the model's mean/std
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(image, self.target_width, self.target_height, self.filter);
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = self.normalization.apply(c, pixel[c]);
            }
        }

        tensor
    }

    /// Read a single-channel alpha tensor (`[1,1,H,W]`, `[1,H,W]` or `[H,W]`)
    pub fn alpha_from_tensor(tensor: &ArrayD<f32>) -> MattingResult<AlphaMask> {
        let shape = tensor.shape();
        let (height, width) = match shape {
            [.., h, w] if *h > 0 && *w > 0 => (*h, *w),
            _ => {
                return Err(MattingError::ContractViolation(format!(
                    "alpha tensor has shape {:?}",
                    shape
                )))
            }
        };
        if tensor.len() != height * width {
            return Err(MattingError::ContractViolation(format!(
                "alpha tensor has shape {:?}, expected a single channel",
                shape
            )));
        }

        let data: Vec<f32> = tensor
            .iter()
            .map(|&a| if a.is_nan() { 0.0 } else { a.clamp(0.0, 1.0) })
            .collect();

        AlphaMask::from_vec(width as u32, height as u32, data).ok_or_else(|| {
            MattingError::ContractViolation("alpha tensor size mismatch".into())
        })
    }
}
