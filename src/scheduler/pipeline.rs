use super::state::{CachedOutput, PipelineKind, PipelineState};
use crate::alpha::{AlphaAnalyzer, AlphaPostProcessor};
use crate::compose::Compositor;
use crate::config::MattingConfig;
use crate::error::MattingResult;
use crate::frame::Frame;
use crate::segmentation::advisor::STREAM_ALIGNMENT;
use crate::segmentation::{AlphaMask, DownsampleAdvisor, MatteInferenceEngine};
use image::imageops::FilterType;
use image::RgbImage;
use std::time::Instant;

/// Body of a detached streaming task
pub struct StreamingProcessor {
    engine: MatteInferenceEngine,
    compositor: Compositor,
    post: AlphaPostProcessor,
}

impl StreamingProcessor {
    pub fn new(engine: MatteInferenceEngine, compositor: Compositor) -> Self {
        Self {
            engine,
            compositor,
            post: AlphaPostProcessor::new(),
        }
    }

    pub fn engine(&self) -> &MatteInferenceEngine {
        &self.engine
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Process one frame and publish it to the pipeline's cache
    ///
    /// Failures are contained here: the frame is dropped and the cache keeps
    /// its previous value.
    pub fn run(
        &self,
        pipeline: &PipelineState,
        frame: &Frame,
        generation: u64,
        config: &MattingConfig,
    ) {
        let kind = pipeline.kind();
        let _span = tracing::debug_span!("stream_frame", pipeline = %kind).entered();
        let started = Instant::now();

        match self.render(pipeline, frame, generation, config) {
            Ok(output) => {
                if pipeline.store(output, generation) {
                    tracing::debug!("{} frame ready in {:?}", kind, started.elapsed());
                } else {
                    tracing::debug!("Discarding {} frame finished after reset", kind);
                }
            }
            Err(e) if e.is_passthrough() => {
                tracing::warn!("{} pipeline passing frames through: {}", kind, e)
            }
            Err(e) => tracing::warn!("Dropping {} frame: {}", kind, e),
        }
    }

    fn render(
        &self,
        pipeline: &PipelineState,
        frame: &Frame,
        generation: u64,
        config: &MattingConfig,
    ) -> MattingResult<CachedOutput> {
        let image = frame.decode_rgb()?;
        let (width, height) = image.dimensions();

        let advisor = DownsampleAdvisor::new(config.advisor.clone());
        let working = advisor.working_size(width, height, pipeline.boost_factor(), STREAM_ALIGNMENT);
        tracing::debug!(
            "{}x{} frame, working size {}x{}",
            width,
            height,
            working.0,
            working.1
        );

        let alpha = match pipeline.kind() {
            PipelineKind::Recurrent => {
                let mut state = pipeline.checkout_recurrent();
                let result =
                    self.engine
                        .matte_recurrent(&mut state, &image, working, config.use_gpu);
                pipeline.restore_recurrent(state, generation);
                result?
            }
            PipelineKind::Fallback => self.engine.matte_fallback(&image, working, config.use_gpu)?,
        };

        let alpha = self.check_alpha(pipeline, alpha, &image, config);

        let alpha = if alpha.dimensions() == (width, height) {
            alpha
        } else {
            let _span = tracing::debug_span!("upscale").entered();
            alpha.resize(width, height, FilterType::Triangle)
        };
        let refined = self.post.refine_streaming(&alpha, config.edge_strength());

        let bytes = self.compositor.render_encoded(
            &image,
            refined,
            config.background.as_deref(),
            frame.encoding,
            config.jpeg_quality,
        )?;

        Ok(CachedOutput {
            bytes,
            width,
            height,
            encoding: frame.encoding,
        })
    }

    /// Repair inverted mattes; re-render degenerate ones through the
    /// still-capture model
    fn check_alpha(
        &self,
        pipeline: &PipelineState,
        mut alpha: AlphaMask,
        image: &RgbImage,
        config: &MattingConfig,
    ) -> AlphaMask {
        let analyzer = AlphaAnalyzer::new(config.analyzer.clone());
        let (_, verdict) = analyzer.analyze(&alpha);
        pipeline.record_boost(verdict.degenerate);

        if verdict.degenerate && pipeline.kind() == PipelineKind::Recurrent {
            match self.engine.matte_still(image, config.quality, config.use_gpu) {
                Ok(rerendered) => {
                    tracing::debug!("Degenerate recurrent matte replaced by still-model pass");
                    alpha = rerendered;
                    if analyzer.analyze(&alpha).1.invert {
                        alpha.invert();
                    }
                    return alpha;
                }
                Err(e) => tracing::debug!("Still-model re-render unavailable: {}", e),
            }
        }

        if verdict.invert {
            tracing::debug!("Inverting {} matte", pipeline.kind());
            alpha.invert();
        }
        alpha
    }
}
