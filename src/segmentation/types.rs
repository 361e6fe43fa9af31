use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};

/// Alpha matte: values where 0.0 = background, 1.0 = foreground
///
/// Stored row-major with no padding. All pixel access goes through the
/// bounds-checked accessors below.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl AlphaMask {
    /// Wrap row-major alpha values; `None` if the length does not match
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        self.index(x, y).map(|i| self.data[i])
    }

    /// Value at signed coordinates, clamped to the nearest edge pixel
    pub fn get_clamped(&self, x: i64, y: i64) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let cx = x.clamp(0, i64::from(self.width) - 1) as u32;
        let cy = y.clamp(0, i64::from(self.height) - 1) as u32;
        self.get(cx, cy).unwrap_or(0.0)
    }

    /// Returns `false` when the coordinates are out of bounds
    pub fn set(&mut self, x: u32, y: u32, value: f32) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn row(&self, y: u32) -> Option<&[f32]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.width as usize;
        self.data.get(start..start + self.width as usize)
    }

    pub fn map_in_place(&mut self, f: impl Fn(f32) -> f32) {
        for value in &mut self.data {
            *value = f(*value);
        }
    }

    /// `1 - a` for every pixel
    pub fn invert(&mut self) {
        self.map_in_place(|a| 1.0 - a);
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Resample to a new size; values are clamped back into [0, 1]
    pub fn resize(&self, width: u32, height: u32, filter: FilterType) -> AlphaMask {
        if (width, height) == self.dimensions() {
            return self.clone();
        }
        if self.data.is_empty() || width == 0 || height == 0 {
            return AlphaMask::filled(width, height, 0.0);
        }

        let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(self.width, self.height, self.data.clone())
                .unwrap_or_else(|| ImageBuffer::new(self.width, self.height));
        let resized = imageops::resize(&buffer, width, height, filter);

        let mut mask = AlphaMask {
            width,
            height,
            data: resized.into_raw(),
        };
        mask.map_in_place(|a| a.clamp(0.0, 1.0));
        mask
    }

    /// 8-bit grayscale rendition, used for mask files
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let value = self.get(x, y).unwrap_or(0.0);
            Luma([(value * 255.0).round().clamp(0.0, 255.0) as u8])
        })
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.pixels().map(|p| f32::from(p[0]) / 255.0).collect(),
        }
    }
}
