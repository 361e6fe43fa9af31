//! Runtime configuration
//!
//! The matting core never receives configuration pushes. Every frame and every
//! still capture reads a fresh [`MattingConfig`] snapshot through a
//! [`ConfigSource`], so a settings UI (or an edited TOML file) takes effect on
//! the next call.

use crate::error::{MattingError, MattingResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Quality tier for still capture and model preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

impl QualityTier {
    /// Longer side fed to still models with dynamic input dimensions
    pub fn still_long_side(self) -> u32 {
        match self {
            QualityTier::Low => 320,
            QualityTier::Medium => 400,
            QualityTier::High => 640,
        }
    }
}

/// Which streaming model the live preview should prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// Recurrent model when its weights are present
    #[default]
    Auto,
    /// Same preference as `Auto`
    Smooth,
    /// Always the lighter, stateless fallback model
    Responsive,
}

impl StreamingMode {
    pub fn prefers_recurrent(self) -> bool {
        matches!(self, StreamingMode::Auto | StreamingMode::Smooth)
    }
}

/// Frame scheduling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum interval between recurrent inferences (ms)
    pub recurrent_interval_ms: u64,
    /// Minimum interval between fallback inferences (ms)
    pub fallback_interval_ms: u64,
    /// Worker threads for detached frame tasks (0 = hardware concurrency)
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recurrent_interval_ms: 30,
            fallback_interval_ms: 45,
            workers: 2,
        }
    }
}

impl SchedulerConfig {
    pub fn recurrent_interval(&self) -> Duration {
        Duration::from_millis(self.recurrent_interval_ms)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_ms)
    }
}

/// Streaming input-resolution parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Pixel area the working resolution aims for
    pub target_pixel_area: f64,
    /// Longest working side before the scale boost is applied
    pub max_dimension: u32,
    /// Lower bound on the downsample ratio
    pub min_ratio: f64,
    /// Added to the boost on every degenerate frame
    pub boost_step: f32,
    /// Upper bound on the boost
    pub boost_max: f32,
    /// Frames the boost is held after a degenerate frame
    pub boost_hold_frames: u32,
    /// Multiplicative decay applied per clean frame after the hold
    pub boost_decay: f32,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            target_pixel_area: 640.0 * 360.0,
            max_dimension: 512,
            min_ratio: 0.125,
            boost_step: 0.25,
            boost_max: 2.0,
            boost_hold_frames: 30,
            boost_decay: 0.95,
        }
    }
}

/// Thresholds for the inversion and degeneracy rules
///
/// Empirically tuned; kept configurable so they can be calibrated against
/// recorded footage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerThresholds {
    /// Samples per axis
    pub grid: u32,
    pub inverted_center_max: f32,
    pub inverted_border_ratio: f32,
    pub auto_invert_mean_max: f32,
    pub auto_invert_peak_min: f32,
    pub degenerate_peak_max: f32,
    pub degenerate_mean_max: f32,
    pub degenerate_center_max: f32,
}

impl Default for AnalyzerThresholds {
    fn default() -> Self {
        Self {
            grid: 32,
            inverted_center_max: 0.15,
            inverted_border_ratio: 1.5,
            auto_invert_mean_max: 0.15,
            auto_invert_peak_min: 0.5,
            degenerate_peak_max: 0.02,
            degenerate_mean_max: 0.05,
            degenerate_center_max: 0.05,
        }
    }
}

/// Complete matting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MattingConfig {
    pub enabled: bool,
    pub quality: QualityTier,
    pub use_gpu: bool,
    /// Edge refinement strength, 0-100
    pub edge_refinement: u8,
    pub streaming_mode: StreamingMode,
    /// Directories searched, in order, for model weights
    pub model_dirs: Vec<PathBuf>,
    /// Background image; `None` keeps the frame (or emits transparency)
    pub background: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub scheduler: SchedulerConfig,
    pub advisor: AdvisorConfig,
    pub analyzer: AnalyzerThresholds,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            quality: QualityTier::Medium,
            use_gpu: true,
            edge_refinement: 50,
            streaming_mode: StreamingMode::Auto,
            model_dirs: vec![PathBuf::from("models")],
            background: None,
            jpeg_quality: 85,
            scheduler: SchedulerConfig::default(),
            advisor: AdvisorConfig::default(),
            analyzer: AnalyzerThresholds::default(),
        }
    }
}

impl MattingConfig {
    /// Parse a TOML document, clamping out-of-range values
    pub fn from_toml_str(text: &str) -> MattingResult<Self> {
        let config: MattingConfig =
            toml::from_str(text).map_err(|e| MattingError::Config(e.to_string()))?;
        Ok(config.sanitized())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> MattingResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Edge refinement as a 0.0-1.0 blend factor
    pub fn edge_strength(&self) -> f32 {
        f32::from(self.edge_refinement.min(100)) / 100.0
    }

    fn sanitized(mut self) -> Self {
        self.edge_refinement = self.edge_refinement.min(100);
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.analyzer.grid = self.analyzer.grid.max(1);
        self.advisor.min_ratio = self.advisor.min_ratio.clamp(0.001, 1.0);
        self.advisor.boost_max = self.advisor.boost_max.max(1.0);
        self
    }
}

/// Read-only, polled configuration provider
pub trait ConfigSource: Send + Sync {
    /// Current configuration snapshot
    fn snapshot(&self) -> MattingConfig;
}

/// In-memory configuration that a settings surface can update
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<MattingConfig>>,
}

impl SharedConfig {
    pub fn new(config: MattingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config.sanitized())),
        }
    }

    /// Apply a change; visible to the next snapshot
    pub fn update(&self, f: impl FnOnce(&mut MattingConfig)) {
        let mut guard = self.inner.write();
        f(&mut guard);
        *guard = guard.clone().sanitized();
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> MattingConfig {
        self.inner.read().clone()
    }
}

/// TOML file re-read whenever its modification time changes
#[derive(Debug)]
pub struct TomlConfigFile {
    path: PathBuf,
    cached: Mutex<(Option<SystemTime>, MattingConfig)>,
}

impl TomlConfigFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let source = Self {
            path: path.as_ref().to_path_buf(),
            cached: Mutex::new((None, MattingConfig::default())),
        };
        source.refresh();
        source
    }

    fn refresh(&self) -> MattingConfig {
        let mut cached = self.cached.lock();
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        if modified.is_some() && modified != cached.0 {
            match MattingConfig::load(&self.path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", self.path.display());
                    *cached = (modified, config);
                }
                Err(e) => {
                    // Keep the last good configuration; retry on next change
                    tracing::warn!(
                        "Ignoring unreadable configuration {}: {}",
                        self.path.display(),
                        e
                    );
                    cached.0 = modified;
                }
            }
        }

        cached.1.clone()
    }
}

impl ConfigSource for TomlConfigFile {
    fn snapshot(&self) -> MattingConfig {
        self.refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MattingConfig::default();
        assert!(config.enabled);
        assert_eq!(config.scheduler.recurrent_interval_ms, 30);
        assert_eq!(config.scheduler.fallback_interval_ms, 45);
        assert_eq!(config.analyzer.grid, 32);
        assert_eq!(config.streaming_mode, StreamingMode::Auto);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MattingConfig::from_toml_str(
            r#"
            quality = "high"
            streaming_mode = "responsive"
            edge_refinement = 250

            [scheduler]
            recurrent_interval_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.quality, QualityTier::High);
        assert_eq!(config.streaming_mode, StreamingMode::Responsive);
        assert_eq!(config.edge_refinement, 100);
        assert_eq!(config.scheduler.recurrent_interval_ms, 50);
        assert_eq!(config.scheduler.fallback_interval_ms, 45);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = MattingConfig::from_toml_str("quality = 7").unwrap_err();
        assert!(matches!(err, MattingError::Config(_)));
    }

    #[test]
    fn test_streaming_mode_preference() {
        assert!(StreamingMode::Auto.prefers_recurrent());
        assert!(StreamingMode::Smooth.prefers_recurrent());
        assert!(!StreamingMode::Responsive.prefers_recurrent());
    }

    #[test]
    fn test_shared_config_update_is_visible() {
        let shared = SharedConfig::new(MattingConfig::default());
        shared.update(|c| c.enabled = false);
        assert!(!shared.snapshot().enabled);
    }

    #[test]
    fn test_toml_file_keeps_last_good_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matting.toml");
        std::fs::write(&path, "use_gpu = false\n").unwrap();

        let source = TomlConfigFile::new(&path);
        assert!(!source.snapshot().use_gpu);

        // Force a different mtime before writing garbage
        std::thread::sleep(Duration::from_millis(20));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"use_gpu = [").unwrap();
        file.sync_all().unwrap();
        drop(file);

        assert!(!source.snapshot().use_gpu);
    }
}
