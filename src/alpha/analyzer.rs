//! Matte sanity checks
//!
//! Models occasionally return a matte that is inverted (background opaque,
//! subject transparent) or so flat it carries no subject at all. Both are
//! detected from a coarse sample grid rather than the full matte.

use crate::config::{AdvisorConfig, AnalyzerThresholds};
use crate::segmentation::AlphaMask;

/// Sampled statistics of one matte
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AlphaStatistics {
    pub mean: f32,
    pub min: f32,
    pub max: f32,
    /// Mean over the middle 50% of width and height
    pub center_mean: f32,
    /// Mean over everything outside the centre region
    pub border_mean: f32,
    pub samples: usize,
}

/// Decision derived from [`AlphaStatistics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatteVerdict {
    pub possibly_inverted: bool,
    pub auto_invert: bool,
    pub invert: bool,
    pub degenerate: bool,
}

/// Whether `(x, y)` lies in the centre region of a `width`x`height` matte
#[inline]
pub fn is_center(x: u32, y: u32, width: u32, height: u32) -> bool {
    let (x, y) = (u64::from(x) * 4, u64::from(y) * 4);
    let (w, h) = (u64::from(width), u64::from(height));
    x >= w && x < 3 * w && y >= h && y < 3 * h
}

#[derive(Debug, Clone, Default)]
pub struct AlphaAnalyzer {
    thresholds: AnalyzerThresholds,
}

impl AlphaAnalyzer {
    pub fn new(thresholds: AnalyzerThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AnalyzerThresholds {
        &self.thresholds
    }

    /// Sample the matte on a `grid`x`grid` lattice of cell centres
    pub fn statistics(&self, mask: &AlphaMask) -> AlphaStatistics {
        let (width, height) = mask.dimensions();
        if width == 0 || height == 0 {
            return AlphaStatistics::default();
        }

        let grid = self.thresholds.grid.max(1);
        let nx = grid.min(width);
        let ny = grid.min(height);

        let mut sum = 0.0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let (mut center_sum, mut center_n) = (0.0f64, 0usize);
        let (mut border_sum, mut border_n) = (0.0f64, 0usize);

        for j in 0..ny {
            let y = ((f64::from(j) + 0.5) * f64::from(height) / f64::from(ny)) as u32;
            for i in 0..nx {
                let x = ((f64::from(i) + 0.5) * f64::from(width) / f64::from(nx)) as u32;
                let a = mask.get_clamped(i64::from(x), i64::from(y));

                sum += f64::from(a);
                min = min.min(a);
                max = max.max(a);
                if is_center(x, y, width, height) {
                    center_sum += f64::from(a);
                    center_n += 1;
                } else {
                    border_sum += f64::from(a);
                    border_n += 1;
                }
            }
        }

        let samples = (nx * ny) as usize;
        let mean_of = |total: f64, n: usize| if n == 0 { 0.0 } else { (total / n as f64) as f32 };

        AlphaStatistics {
            mean: mean_of(sum, samples),
            min,
            max,
            center_mean: mean_of(center_sum, center_n),
            border_mean: mean_of(border_sum, border_n),
            samples,
        }
    }

    pub fn judge(&self, stats: &AlphaStatistics) -> MatteVerdict {
        let t = &self.thresholds;

        let possibly_inverted = stats.center_mean < t.inverted_center_max
            && stats.border_mean > t.inverted_border_ratio * stats.center_mean;
        let auto_invert = stats.mean < t.auto_invert_mean_max && stats.max > t.auto_invert_peak_min;
        let degenerate = stats.max < t.degenerate_peak_max
            || (stats.mean < t.degenerate_mean_max && stats.center_mean < t.degenerate_center_max);

        MatteVerdict {
            possibly_inverted,
            auto_invert,
            invert: possibly_inverted || auto_invert,
            degenerate,
        }
    }

    pub fn analyze(&self, mask: &AlphaMask) -> (AlphaStatistics, MatteVerdict) {
        let stats = self.statistics(mask);
        let verdict = self.judge(&stats);
        tracing::debug!(
            "alpha mean={:.3} max={:.3} center={:.3} border={:.3} invert={} degenerate={}",
            stats.mean,
            stats.max,
            stats.center_mean,
            stats.border_mean,
            verdict.invert,
            verdict.degenerate
        );
        (stats, verdict)
    }
}

/// Hysteresis on the streaming max-dimension after degenerate frames
///
/// Each degenerate frame raises the factor by a step up to a cap and restarts
/// a hold period; once the hold has elapsed, every clean frame decays the
/// factor back towards 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleBoost {
    factor: f32,
    hold: u32,
    step: f32,
    max: f32,
    hold_frames: u32,
    decay: f32,
}

impl Default for ScaleBoost {
    fn default() -> Self {
        Self::new(&AdvisorConfig::default())
    }
}

impl ScaleBoost {
    pub fn new(config: &AdvisorConfig) -> Self {
        Self {
            factor: 1.0,
            hold: 0,
            step: config.boost_step.max(0.0),
            max: config.boost_max.max(1.0),
            hold_frames: config.boost_hold_frames,
            decay: config.boost_decay.clamp(0.0, 1.0),
        }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }

    pub fn record(&mut self, degenerate: bool) {
        if degenerate {
            self.factor = (self.factor + self.step).min(self.max);
            self.hold = self.hold_frames;
            tracing::debug!("Scale boost raised to {:.2}", self.factor);
        } else if self.hold > 0 {
            self.hold -= 1;
        } else if self.factor > 1.0 {
            self.factor = (self.factor * self.decay).max(1.0);
        }
    }

    pub fn reset(&mut self) {
        self.factor = 1.0;
        self.hold = 0;
    }
}
