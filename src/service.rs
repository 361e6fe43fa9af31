//! Composition root tying configuration, sessions, scheduling and compositing
//! together behind one explicit service object

use crate::alpha::{AlphaAnalyzer, AlphaPostProcessor};
use crate::compose::{resolve_mask, BackgroundCache, Compositor, Rendered};
use crate::config::{ConfigSource, MattingConfig, QualityTier};
use crate::error::{MattingError, MattingResult};
use crate::frame::Frame;
use crate::inference::{OrtSessionFactory, SessionFactory, SessionPool, SessionPurpose};
use crate::models::ModelRegistry;
use crate::scheduler::{FrameInfo, FrameScheduler};
use crate::segmentation::{AlphaMask, MatteInferenceEngine};
use image::{ImageFormat, RgbImage};
use parking_lot::{Condvar, Mutex};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a [`MattingService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(String),
    ShutDown,
}

/// Where a still capture reads its image from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StillSource {
    Path(PathBuf),
    /// Encoded image bytes (any format the `image` crate can sniff)
    Bytes(Vec<u8>),
}

/// Still capture output, mirroring the kind of [`StillSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StillOutput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct StillRequest {
    pub source: StillSource,
    /// Overrides the configured quality tier
    pub quality: Option<QualityTier>,
    /// Destination for file outputs; defaults to the source's directory
    pub output_dir: Option<PathBuf>,
}

impl StillRequest {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            source: StillSource::Path(path.into()),
            quality: None,
            output_dir: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: StillSource::Bytes(bytes),
            quality: None,
            output_dir: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct StillResult {
    /// Composited image, or the untouched input when nothing was matted
    pub image: StillOutput,
    pub mask: Option<StillOutput>,
    pub elapsed: Duration,
    pub success: bool,
    /// The input was returned instead of a matted result
    pub fallback_used: bool,
}

struct StillImages {
    composited: Rendered,
    mask: AlphaMask,
}

/// The matting engine as seen by its collaborators
pub struct MattingService {
    config: Arc<dyn ConfigSource>,
    engine: MatteInferenceEngine,
    scheduler: FrameScheduler,
    compositor: Compositor,
    post: AlphaPostProcessor,
    state: Mutex<ServiceState>,
    changed: Condvar,
}

impl MattingService {
    /// Service backed by ONNX Runtime, searching the configured model dirs
    pub fn with_defaults(config: Arc<dyn ConfigSource>) -> MattingResult<Self> {
        Self::new(config, Arc::new(OrtSessionFactory))
    }

    pub fn new(
        config: Arc<dyn ConfigSource>,
        factory: Arc<dyn SessionFactory>,
    ) -> MattingResult<Self> {
        let registry = ModelRegistry::from_dirs(config.snapshot().model_dirs);
        Self::with_registry(config, registry, factory)
    }

    pub fn with_registry(
        config: Arc<dyn ConfigSource>,
        registry: ModelRegistry,
        factory: Arc<dyn SessionFactory>,
    ) -> MattingResult<Self> {
        let pool = Arc::new(SessionPool::new(Arc::new(registry), factory));
        let engine = MatteInferenceEngine::new(pool);
        let compositor = Compositor::with_cache(Arc::new(BackgroundCache::new()));
        let scheduler =
            FrameScheduler::new(engine.clone(), compositor.clone(), Arc::clone(&config))?;

        Ok(Self {
            config,
            engine,
            scheduler,
            compositor,
            post: AlphaPostProcessor::new(),
            state: Mutex::new(ServiceState::Uninitialized),
            changed: Condvar::new(),
        })
    }

    pub fn state(&self) -> ServiceState {
        self.state.lock().clone()
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &MatteInferenceEngine {
        &self.engine
    }

    /// The one background cache shared by streaming and still compositing
    pub fn backgrounds(&self) -> &BackgroundCache {
        self.compositor.backgrounds()
    }

    /// Eagerly create the sessions the current configuration needs
    ///
    /// Returns true once at least one of them is usable. Concurrent callers
    /// wait for the initialization already in progress.
    pub fn initialize(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            match &*state {
                ServiceState::Ready => return true,
                ServiceState::ShutDown => return false,
                ServiceState::Initializing => self.changed.wait(&mut state),
                ServiceState::Uninitialized | ServiceState::Failed(_) => break,
            }
        }
        *state = ServiceState::Initializing;
        drop(state);

        let _span = tracing::info_span!("initialize").entered();
        let outcome = self.create_sessions(&self.config.snapshot());

        let mut state = self.state.lock();
        let ready = outcome.is_ok();
        *state = match outcome {
            Ok(()) => {
                tracing::info!("Matting service ready");
                ServiceState::Ready
            }
            Err(e) => {
                tracing::warn!("Matting service initialization failed: {}", e);
                ServiceState::Failed(e.to_string())
            }
        };
        self.changed.notify_all();
        ready
    }

    fn create_sessions(&self, config: &MattingConfig) -> MattingResult<()> {
        if !config.enabled {
            return Err(MattingError::Disabled);
        }

        let registry = self.engine.pool().registry();
        let streaming =
            if config.streaming_mode.prefers_recurrent() && registry.has_recurrent() {
                SessionPurpose::Recurrent
            } else {
                SessionPurpose::LiveFallback
            };

        let mut last_error = None;
        let mut created = 0;
        for purpose in [streaming, SessionPurpose::Still] {
            match self
                .engine
                .pool()
                .acquire(purpose, config.quality, config.use_gpu)
            {
                Ok(acquired) => {
                    tracing::info!(
                        "{} session: {} on {}",
                        purpose,
                        acquired.descriptor.id,
                        acquired.backend
                    );
                    created += 1;
                }
                Err(e) => {
                    tracing::info!("No {} session: {}", purpose, e);
                    last_error = Some(e);
                }
            }
        }

        match (created, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// Block until the service leaves `Uninitialized`/`Initializing`
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while matches!(
            *state,
            ServiceState::Uninitialized | ServiceState::Initializing
        ) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == ServiceState::Ready
    }

    /// Streaming entry point; see [`FrameScheduler::submit`]
    pub fn submit_frame(&self, frame: &Frame) -> Vec<u8> {
        self.scheduler.submit(frame)
    }

    pub fn try_get_latest_frame_info(&self) -> FrameInfo {
        self.scheduler.try_get_latest_frame_info()
    }

    /// Matte and composite a single image with the still model
    ///
    /// Never fails outright: without a usable model the input comes back
    /// unchanged with `fallback_used` set.
    pub fn capture_still(&self, request: &StillRequest) -> StillResult {
        let started = Instant::now();
        let config = self.config.snapshot();
        let quality = request.quality.unwrap_or(config.quality);
        let _span = tracing::info_span!("capture_still", ?quality).entered();

        let unchanged = |success: bool| StillResult {
            image: match &request.source {
                StillSource::Path(path) => StillOutput::Path(path.clone()),
                StillSource::Bytes(bytes) => StillOutput::Bytes(bytes.clone()),
            },
            mask: None,
            elapsed: started.elapsed(),
            success,
            fallback_used: true,
        };

        if *self.state.lock() == ServiceState::ShutDown || !config.enabled {
            return unchanged(true);
        }

        let image = match decode_source(&request.source) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!("Unreadable still input: {}", e);
                return unchanged(false);
            }
        };

        let images = match self.render_still(&image, quality, &config) {
            Ok(images) => images,
            Err(e) if e.is_passthrough() => {
                tracing::info!("Still capture passed through: {}", e);
                return unchanged(true);
            }
            Err(e) => {
                tracing::warn!("Still capture failed: {}", e);
                return unchanged(false);
            }
        };

        match write_outputs(request, &image, images) {
            Ok((image, mask)) => {
                let elapsed = started.elapsed();
                tracing::info!("Still capture done in {:?}", elapsed);
                StillResult {
                    image,
                    mask: Some(mask),
                    elapsed,
                    success: true,
                    fallback_used: false,
                }
            }
            Err(e) => {
                tracing::warn!("Could not write still output: {}", e);
                unchanged(false)
            }
        }
    }

    fn render_still(
        &self,
        image: &RgbImage,
        quality: QualityTier,
        config: &MattingConfig,
    ) -> MattingResult<StillImages> {
        let (width, height) = image.dimensions();
        let mut alpha = self.engine.matte_still(image, quality, config.use_gpu)?;

        let (_, verdict) = AlphaAnalyzer::new(config.analyzer.clone()).analyze(&alpha);
        if verdict.invert {
            tracing::debug!("Inverting still matte");
            alpha.invert();
        }

        let refined = self.post.refine_still(&alpha, config.edge_strength());
        let mask = resolve_mask(refined, width, height)?;
        let composited = self.compositor.render(
            image,
            mask.clone(),
            config.background.as_deref(),
            true,
        )?;

        Ok(StillImages { composited, mask })
    }

    /// Release sessions, caches and state; later calls pass through
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if *state == ServiceState::ShutDown {
            return;
        }
        *state = ServiceState::ShutDown;
        self.changed.notify_all();
        drop(state);

        self.scheduler.shutdown();
        self.compositor.backgrounds().clear();
        self.engine.pool().close();
        tracing::info!("Matting service shut down");
    }
}

impl Drop for MattingService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn decode_source(source: &StillSource) -> MattingResult<RgbImage> {
    let decoded = match source {
        StillSource::Path(path) => image::open(path)?,
        StillSource::Bytes(bytes) => image::load_from_memory(bytes)?,
    };
    Ok(decoded.to_rgb8())
}

fn encode_png(rendered: &Rendered, original: &RgbImage) -> MattingResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match rendered {
        Rendered::Opaque(rgb) => rgb.write_to(&mut buf, ImageFormat::Png)?,
        Rendered::Transparent(rgba) => rgba.write_to(&mut buf, ImageFormat::Png)?,
        Rendered::Unchanged => original.write_to(&mut buf, ImageFormat::Png)?,
    }
    Ok(buf.into_inner())
}

fn output_paths(source: &Path, output_dir: Option<&Path>) -> (PathBuf, PathBuf) {
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| source.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "capture".to_string());
    (
        dir.join(format!("{}_matted.png", stem)),
        dir.join(format!("{}_mask.png", stem)),
    )
}

fn write_outputs(
    request: &StillRequest,
    original: &RgbImage,
    images: StillImages,
) -> MattingResult<(StillOutput, StillOutput)> {
    let composited = encode_png(&images.composited, original)?;
    let mut mask = Cursor::new(Vec::new());
    images.mask.to_gray().write_to(&mut mask, ImageFormat::Png)?;
    let mask = mask.into_inner();

    match &request.source {
        StillSource::Bytes(_) => Ok((StillOutput::Bytes(composited), StillOutput::Bytes(mask))),
        StillSource::Path(source) => {
            let (image_path, mask_path) = output_paths(source, request.output_dir.as_deref());
            if let Some(dir) = image_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&image_path, composited)?;
            std::fs::write(&mask_path, mask)?;
            tracing::debug!(
                "Wrote {} and {}",
                image_path.display(),
                mask_path.display()
            );
            Ok((StillOutput::Path(image_path), StillOutput::Path(mask_path)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_paths_follow_source() {
        let (image, mask) = output_paths(Path::new("/photos/booth/IMG_01.jpg"), None);
        assert_eq!(image, PathBuf::from("/photos/booth/IMG_01_matted.png"));
        assert_eq!(mask, PathBuf::from("/photos/booth/IMG_01_mask.png"));

        let (image, _) = output_paths(Path::new("IMG_01.jpg"), Some(Path::new("/out")));
        assert_eq!(image, PathBuf::from("/out/IMG_01_matted.png"));
    }

    #[test]
    fn test_request_builders() {
        let request = StillRequest::from_bytes(vec![1, 2])
            .with_quality(QualityTier::High)
            .with_output_dir("/tmp");
        assert_eq!(request.quality, Some(QualityTier::High));
        assert_eq!(request.output_dir, Some(PathBuf::from("/tmp")));
    }
}
