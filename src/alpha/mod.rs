mod analyzer;
mod postprocess;

pub use analyzer::{is_center, AlphaAnalyzer, AlphaStatistics, MatteVerdict, ScaleBoost};
pub use postprocess::{AlphaPostProcessor, QualityCurve, RemapCurve};
