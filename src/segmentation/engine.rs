use super::advisor::still_working_size;
use super::preprocess::Preprocessor;
use super::types::AlphaMask;
use crate::config::QualityTier;
use crate::error::{MattingError, MattingResult};
use crate::inference::{AcquiredSession, MatteSession, SessionPool, SessionPurpose};
use crate::models::{InputSize, ModelDescriptor};
use image::imageops::FilterType;
use image::RgbImage;
use std::sync::Arc;

/// How to size the input of a stateless model with dynamic dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    /// Quality-tier long side (still capture)
    Still(QualityTier),
    /// Advisor-chosen working size (live fallback)
    Streaming(u32, u32),
}

/// Runs inference passes against the pooled sessions
#[derive(Clone)]
pub struct MatteInferenceEngine {
    pool: Arc<SessionPool>,
}

impl MatteInferenceEngine {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Single stateless pass; the mask comes back at the image's size
    pub fn matte_still(
        &self,
        image: &RgbImage,
        quality: QualityTier,
        prefer_gpu: bool,
    ) -> MattingResult<AlphaMask> {
        let _span = tracing::debug_span!("matte_still").entered();
        let acquired = self.pool.acquire(SessionPurpose::Still, quality, prefer_gpu)?;
        run_stateless(&acquired, image, SizePolicy::Still(quality), FilterType::Lanczos3)
    }

    /// Stateless pass on the live fallback model, cheap resampling
    pub fn matte_fallback(
        &self,
        image: &RgbImage,
        working: (u32, u32),
        prefer_gpu: bool,
    ) -> MattingResult<AlphaMask> {
        let _span = tracing::debug_span!("matte_fallback").entered();
        let acquired =
            self.pool
                .acquire(SessionPurpose::LiveFallback, QualityTier::Medium, prefer_gpu)?;
        run_stateless(
            &acquired,
            image,
            SizePolicy::Streaming(working.0, working.1),
            FilterType::Triangle,
        )
    }
}

/// Input size for a stateless model
pub fn model_input_size(
    descriptor: &ModelDescriptor,
    declared: Option<(u32, u32)>,
    source: (u32, u32),
    policy: SizePolicy,
) -> (u32, u32) {
    match descriptor.input_size {
        InputSize::Fixed { width, height } => (width, height),
        InputSize::FromMetadata => declared.unwrap_or(match policy {
            SizePolicy::Still(quality) => still_working_size(source.0, source.1, quality),
            SizePolicy::Streaming(w, h) => (w, h),
        }),
    }
}

pub(crate) fn input_name(
    descriptor: &ModelDescriptor,
    session: &dyn MatteSession,
) -> MattingResult<String> {
    descriptor
        .input_name
        .map(str::to_string)
        .or_else(|| session.input_names().into_iter().next())
        .ok_or_else(|| MattingError::ContractViolation("model declares no inputs".into()))
}

fn alpha_name(descriptor: &ModelDescriptor, session: &dyn MatteSession) -> MattingResult<String> {
    descriptor
        .alpha_output
        .map(str::to_string)
        .or_else(|| session.output_names().into_iter().next())
        .ok_or_else(|| MattingError::ContractViolation("model declares no outputs".into()))
}

fn run_stateless(
    acquired: &AcquiredSession,
    image: &RgbImage,
    policy: SizePolicy,
    filter: FilterType,
) -> MattingResult<AlphaMask> {
    let descriptor = acquired.descriptor;
    let mut session = acquired.session.lock();

    let input = input_name(descriptor, &**session)?;
    let output = alpha_name(descriptor, &**session)?;
    let (width, height) = model_input_size(
        descriptor,
        session.input_dims(&input),
        image.dimensions(),
        policy,
    );
    tracing::debug!(
        "{} input {}x{} for {}x{} source",
        descriptor.id,
        width,
        height,
        image.width(),
        image.height()
    );

    let tensor = Preprocessor::new(width, height, descriptor.normalization)
        .with_filter(filter)
        .preprocess(image);
    let outputs = session.run(vec![(input, tensor.into_dyn())])?;
    drop(session);

    let alpha = outputs
        .get(&output)
        .ok_or_else(|| MattingError::ContractViolation(format!("missing output '{}'", output)))?;
    let mask = Preprocessor::alpha_from_tensor(alpha)?;

    let _span = tracing::debug_span!("postprocess").entered();
    Ok(mask.resize(image.width(), image.height(), filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BIREFNET_PORTRAIT, MODNET};

    #[test]
    fn test_fixed_size_wins() {
        let size = model_input_size(
            &BIREFNET_PORTRAIT,
            Some((512, 512)),
            (1000, 1500),
            SizePolicy::Still(QualityTier::Low),
        );
        assert_eq!(size, (1024, 1024));
    }

    #[test]
    fn test_declared_metadata_before_policy() {
        let size = model_input_size(
            &MODNET,
            Some((512, 288)),
            (1000, 1500),
            SizePolicy::Still(QualityTier::Medium),
        );
        assert_eq!(size, (512, 288));
    }

    #[test]
    fn test_dynamic_model_uses_policy() {
        let still = model_input_size(&MODNET, None, (1000, 1500), SizePolicy::Still(QualityTier::Medium));
        assert_eq!(still, (256, 416));
        let live = model_input_size(&MODNET, None, (1920, 1080), SizePolicy::Streaming(512, 288));
        assert_eq!(live, (512, 288));
    }
}
