use crate::segmentation::AlphaMask;

/// Piecewise alpha remap used on the streaming path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemapCurve {
    /// Below this the pixel is background
    pub floor: f32,
    /// Above this the pixel is foreground
    pub ceiling: f32,
    /// Values below this are weak signal and get `weak_gain`
    pub weak_limit: f32,
    pub weak_gain: f32,
    pub low_knee: f32,
    pub high_knee: f32,
    pub gain: f32,
}

impl Default for RemapCurve {
    fn default() -> Self {
        Self {
            floor: 0.01,
            ceiling: 0.9,
            weak_limit: 0.15,
            weak_gain: 6.0,
            low_knee: 0.02,
            high_knee: 0.20,
            gain: 2.5,
        }
    }
}

/// Remap used on still captures, where edge gradations matter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityCurve {
    pub floor: f32,
    pub ceiling: f32,
    pub low_knee: f32,
    pub high_knee: f32,
    pub gamma: f32,
    /// Exponent of the S-curve; 1.0 leaves contrast unchanged
    pub contrast: f32,
}

impl Default for QualityCurve {
    fn default() -> Self {
        Self {
            floor: 0.01,
            ceiling: 0.9,
            low_knee: 0.05,
            high_knee: 0.85,
            gamma: 0.8,
            contrast: 1.5,
        }
    }
}

#[inline]
fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn knee(a: f32, low: f32, high: f32) -> f32 {
    if high <= low {
        return if a >= high { 1.0 } else { 0.0 };
    }
    ((a - low) / (high - low)).clamp(0.0, 1.0)
}

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Alpha refinement: remapping, edge smoothing and feathering
#[derive(Debug, Clone)]
pub struct AlphaPostProcessor {
    pub fast: RemapCurve,
    pub quality: QualityCurve,
    /// Smoothing is restricted to `edge_band.0 < a < edge_band.1`
    pub edge_band: (f32, f32),
    /// Mean absolute neighbour difference that marks a jagged pixel
    pub feather_threshold: f32,
}

impl Default for AlphaPostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AlphaPostProcessor {
    pub fn new() -> Self {
        Self {
            fast: RemapCurve::default(),
            quality: QualityCurve::default(),
            edge_band: (0.05, 0.95),
            feather_threshold: 0.2,
        }
    }

    /// Cheap per-pixel remap; output is always in [0, 1]
    pub fn fast_remap(&self, a: f32) -> f32 {
        let c = &self.fast;
        if a.is_nan() || a < c.floor {
            0.0
        } else if a > c.ceiling {
            1.0
        } else if a < c.weak_limit {
            (a * c.weak_gain).min(1.0)
        } else {
            (knee(a, c.low_knee, c.high_knee) * c.gain).clamp(0.0, 1.0)
        }
    }

    /// Knee, gamma, smoothstep and contrast S-curve
    pub fn quality_remap(&self, a: f32) -> f32 {
        let c = &self.quality;
        if a.is_nan() || a < c.floor {
            return 0.0;
        }
        if a > c.ceiling {
            return 1.0;
        }

        let t = knee(a, c.low_knee, c.high_knee).powf(c.gamma.max(f32::EPSILON));
        let t = smoothstep(t);
        let p = t.powf(c.contrast.max(f32::EPSILON));
        let q = (1.0 - t).powf(c.contrast.max(f32::EPSILON));
        if p + q <= 0.0 {
            t
        } else {
            (p / (p + q)).clamp(0.0, 1.0)
        }
    }

    fn in_edge_band(&self, a: f32) -> bool {
        a > self.edge_band.0 && a < self.edge_band.1
    }

    /// 3x3 weighted smoothing of near-edge pixels only
    pub fn smooth_edges(&self, mask: &AlphaMask) -> AlphaMask {
        const KERNEL: [[f32; 3]; 3] = [[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]];

        AlphaMask::from_fn(mask.width(), mask.height(), |x, y| {
            let a = mask.get(x, y).unwrap_or(0.0);
            if !self.in_edge_band(a) {
                return a;
            }
            let (x, y) = (i64::from(x), i64::from(y));
            let mut sum = 0.0;
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    sum += weight * mask.get_clamped(x + kx as i64 - 1, y + ky as i64 - 1);
                }
            }
            sum / 16.0
        })
    }

    /// Smoothstep pixels whose neighbourhood disagrees strongly with them
    pub fn feather_edges(&self, mask: &AlphaMask) -> AlphaMask {
        AlphaMask::from_fn(mask.width(), mask.height(), |x, y| {
            let a = mask.get(x, y).unwrap_or(0.0);
            let (xi, yi) = (i64::from(x), i64::from(y));
            let variation = NEIGHBOURS
                .iter()
                .map(|(dx, dy)| (mask.get_clamped(xi + dx, yi + dy) - a).abs())
                .sum::<f32>()
                / NEIGHBOURS.len() as f32;

            if variation > self.feather_threshold {
                smoothstep(a)
            } else {
                a
            }
        })
    }

    /// Streaming refinement: fast remap, then feathering blended by `strength`
    pub fn refine_streaming(&self, mask: &AlphaMask, strength: f32) -> AlphaMask {
        let _span = tracing::debug_span!("refine_streaming").entered();
        let mut remapped = mask.clone();
        remapped.map_in_place(|a| self.fast_remap(a));

        let strength = strength.clamp(0.0, 1.0);
        if strength <= 0.0 {
            return remapped;
        }
        let feathered = self.feather_edges(&remapped);
        blend(&remapped, &feathered, strength)
    }

    /// Still refinement: edge smoothing, quality remap and feathering,
    /// blended over the plain quality remap by `strength`
    pub fn refine_still(&self, mask: &AlphaMask, strength: f32) -> AlphaMask {
        let _span = tracing::debug_span!("refine_still").entered();
        let mut plain = mask.clone();
        plain.map_in_place(|a| self.quality_remap(a));

        let strength = strength.clamp(0.0, 1.0);
        if strength <= 0.0 {
            return plain;
        }

        let mut refined = self.smooth_edges(mask);
        refined.map_in_place(|a| self.quality_remap(a));
        let refined = self.feather_edges(&refined);
        blend(&plain, &refined, strength)
    }
}

fn blend(base: &AlphaMask, refined: &AlphaMask, strength: f32) -> AlphaMask {
    AlphaMask::from_fn(base.width(), base.height(), |x, y| {
        let a = base.get(x, y).unwrap_or(0.0);
        let b = refined.get(x, y).unwrap_or(a);
        (a + (b - a) * strength).clamp(0.0, 1.0)
    })
}
