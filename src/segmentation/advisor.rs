//! Input-resolution selection
//!
//! Keeps inference cost roughly constant regardless of the source resolution:
//! the working size aims for a fixed pixel area, is capped by a maximum
//! dimension (raised by the scale boost after degenerate frames) and floored
//! by a minimum ratio.

use crate::config::{AdvisorConfig, QualityTier};

/// Smallest side any model input is allowed to have
pub const MIN_DIMENSION: u32 = 64;

/// Stride alignment for streaming inputs
pub const STREAM_ALIGNMENT: u32 = 16;

/// Alignment for still inputs with dynamic dimensions
pub const STILL_ALIGNMENT: u32 = 32;

/// Downsample ratio for a `width`x`height` source
///
/// `sqrt(target_pixel_area / area)`, no larger than `max_dimension / longest
/// side` or 1.0, no smaller than `min_ratio`, rounded to 3 decimals.
pub fn compute_ratio(
    width: u32,
    height: u32,
    target_pixel_area: f64,
    max_dimension: u32,
    min_ratio: f64,
) -> f64 {
    let min_ratio = if min_ratio.is_finite() {
        min_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if width == 0 || height == 0 {
        return 1.0;
    }

    let area = f64::from(width) * f64::from(height);
    let mut ratio = (target_pixel_area.max(0.0) / area).sqrt();
    if !ratio.is_finite() {
        ratio = 1.0;
    }

    let cap = f64::from(max_dimension) / f64::from(width.max(height));
    ratio = ratio.min(cap).min(1.0);
    ratio = (ratio * 1000.0).round() / 1000.0;
    ratio.clamp(min_ratio, 1.0)
}

/// Round `value` up to a multiple of `multiple`, never below 64
///
/// Idempotent for any `multiple`.
pub fn align_to_multiple(value: u32, multiple: u32) -> u32 {
    let m = u64::from(multiple.max(1));
    let floor = u64::from(MIN_DIMENSION).div_ceil(m) * m;
    let aligned = (u64::from(value).div_ceil(m) * m).max(floor);
    if aligned > u64::from(u32::MAX) {
        (u64::from(u32::MAX) / m * m) as u32
    } else {
        aligned as u32
    }
}

/// `original * ratio`, aligned, never larger than `original`
///
/// Sources smaller than 64 pixels are returned unchanged.
pub fn scaled_dimension(original: u32, ratio: f64, multiple: u32) -> u32 {
    if original < MIN_DIMENSION {
        return original;
    }
    let scaled = (f64::from(original) * ratio).round() as u32;
    let aligned = align_to_multiple(scaled, multiple);
    if aligned <= original {
        return aligned;
    }

    let m = multiple.max(1);
    let floor = original / m * m;
    if floor >= MIN_DIMENSION {
        floor
    } else {
        original
    }
}

/// Size for still models with dynamic input dimensions
///
/// The longer side targets the quality tier's size; both sides are rounded to
/// the nearest multiple of 32.
pub fn still_working_size(width: u32, height: u32, quality: QualityTier) -> (u32, u32) {
    let longest = f64::from(width.max(height).max(1));
    let target = f64::from(quality.still_long_side());
    let round = |v: u32| {
        let scaled = f64::from(v) * target / longest;
        let steps = (scaled / f64::from(STILL_ALIGNMENT)).round() as u32;
        steps.max(1) * STILL_ALIGNMENT
    };
    (round(width), round(height))
}

/// Streaming working-resolution policy
#[derive(Debug, Clone)]
pub struct DownsampleAdvisor {
    config: AdvisorConfig,
}

impl DownsampleAdvisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    /// Ratio for a source, with the max dimension scaled by `boost`
    pub fn ratio(&self, width: u32, height: u32, boost: f32) -> f64 {
        let boost = boost.clamp(1.0, self.config.boost_max.max(1.0));
        let max_dimension = (self.config.max_dimension as f32 * boost).round() as u32;
        compute_ratio(
            width,
            height,
            self.config.target_pixel_area,
            max_dimension,
            self.config.min_ratio,
        )
    }

    /// Aligned working size for a source
    pub fn working_size(&self, width: u32, height: u32, boost: f32, multiple: u32) -> (u32, u32) {
        let ratio = self.ratio(width, height, boost);
        (
            scaled_dimension(width, ratio, multiple),
            scaled_dimension(height, ratio, multiple),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_for_full_hd() {
        // sqrt(230400 / 2073600) = 0.333, cap 512 / 1920 = 0.267
        let ratio = compute_ratio(1920, 1080, 230_400.0, 512, 0.125);
        assert_eq!(ratio, 0.267);
        let boosted = compute_ratio(1920, 1080, 230_400.0, 1024, 0.125);
        assert_eq!(boosted, 0.333);
    }

    #[test]
    fn test_ratio_is_bounded() {
        for &(w, h) in &[(1, 1), (64, 64), (640, 480), (4000, 3000), (10_000, 20)] {
            for &area in &[0.0, 1_000.0, 230_400.0, 1e12] {
                for &max_dim in &[0, 64, 512, 100_000] {
                    let r = compute_ratio(w, h, area, max_dim, 0.1);
                    assert!((0.1..=1.0).contains(&r), "{w}x{h} area={area} max={max_dim} -> {r}");
                }
            }
        }
    }

    #[test]
    fn test_ratio_never_exceeds_one_for_small_sources() {
        assert_eq!(compute_ratio(320, 240, 230_400.0, 512, 0.125), 1.0);
    }

    #[test]
    fn test_ratio_is_rounded_to_three_decimals() {
        let r = compute_ratio(1234, 567, 100_000.0, 10_000, 0.01);
        assert_eq!((r * 1000.0).round() / 1000.0, r);
    }

    #[test]
    fn test_align_rounds_up_with_minimum() {
        assert_eq!(align_to_multiple(0, 16), 64);
        assert_eq!(align_to_multiple(63, 16), 64);
        assert_eq!(align_to_multiple(65, 16), 80);
        assert_eq!(align_to_multiple(512, 16), 512);
        assert_eq!(align_to_multiple(10, 48), 96);
    }

    #[test]
    fn test_align_is_idempotent() {
        for m in [1, 7, 16, 32, 48, 100] {
            for v in (0..2000).step_by(13) {
                let once = align_to_multiple(v, m);
                assert_eq!(align_to_multiple(once, m), once, "v={v} m={m}");
            }
        }
    }

    #[test]
    fn test_scaled_dimension_bounds() {
        for original in [64, 70, 100, 333, 640, 1080, 1920, 4095] {
            for ratio in [0.001, 0.1, 0.267, 0.5, 0.999, 1.0] {
                let d = scaled_dimension(original, ratio, 16);
                assert!(d >= MIN_DIMENSION, "{original} * {ratio} -> {d}");
                assert!(d <= original, "{original} * {ratio} -> {d}");
            }
        }
        assert_eq!(scaled_dimension(40, 0.5, 16), 40);
    }

    #[test]
    fn test_still_working_size_medium() {
        let (w, h) = still_working_size(1000, 1500, QualityTier::Medium);
        // 400 on the long side, to the nearest multiple of 32
        assert_eq!(h, 416);
        assert_eq!(w, 256);
        assert_eq!(w % 32, 0);
    }

    #[test]
    fn test_advisor_boost_raises_working_size() {
        let advisor = DownsampleAdvisor::new(AdvisorConfig::default());
        let base = advisor.working_size(1920, 1080, 1.0, 16);
        let boosted = advisor.working_size(1920, 1080, 2.0, 16);
        assert!(boosted.0 > base.0);
        assert_eq!(base.0 % 16, 0);
        // Boost beyond the cap is ignored
        assert_eq!(advisor.working_size(1920, 1080, 5.0, 16), boosted);
    }
}
