use super::engine::{input_name, MatteInferenceEngine};
use super::preprocess::Preprocessor;
use super::types::AlphaMask;
use crate::config::QualityTier;
use crate::error::{MattingError, MattingResult};
use crate::inference::{RecurrentState, SessionPurpose, TensorMap, STATE_OUTPUTS};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{ArrayD, IxDyn};

const DOWNSAMPLE_RATIO_INPUT: &str = "downsample_ratio";
const ALPHA_OUTPUT: &str = "pha";

impl MatteInferenceEngine {
    /// Recurrent video matting pass, alpha at the working resolution
    ///
    /// The image is resized to `working` and fed together with the hidden
    /// states `r1..r4`. The states returned by the model replace `state`
    /// as soon as the run succeeds, before the alpha is inspected, so
    /// temporal continuity survives a degenerate frame that gets re-rendered
    /// by the still-capture model. The `fgr` output is not read; compositing uses
    /// the camera pixels.
    pub fn matte_recurrent(
        &self,
        state: &mut RecurrentState,
        image: &RgbImage,
        working: (u32, u32),
        prefer_gpu: bool,
    ) -> MattingResult<AlphaMask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let acquired = self
            .pool()
            .acquire(SessionPurpose::Recurrent, QualityTier::Medium, prefer_gpu)?;
        let descriptor = acquired.descriptor;

        if state.bind_working_size(working) {
            tracing::debug!("Working size changed to {}x{}", working.0, working.1);
        }

        // src is already at the working resolution, so the model must not
        // downsample it again
        let src = Preprocessor::new(working.0, working.1, descriptor.normalization)
            .with_filter(FilterType::Triangle)
            .preprocess(image);

        let mut session = acquired.session.lock();
        let src_name = input_name(descriptor, &**session)?;
        let wants_ratio = session
            .input_names()
            .iter()
            .any(|name| name == DOWNSAMPLE_RATIO_INPUT);

        let mut inputs = Vec::with_capacity(6);
        inputs.push((src_name, src.into_dyn()));
        inputs.extend(state.as_inputs());
        if wants_ratio {
            inputs.push((
                DOWNSAMPLE_RATIO_INPUT.to_string(),
                ArrayD::from_elem(IxDyn(&[1]), 1.0f32),
            ));
        }

        let mut outputs = session.run(inputs)?;
        drop(session);

        state.replace(take_states(&mut outputs)?)?;

        let alpha_tensor = outputs.get(ALPHA_OUTPUT).ok_or_else(|| {
            MattingError::ContractViolation(format!("missing output '{}'", ALPHA_OUTPUT))
        })?;
        Preprocessor::alpha_from_tensor(alpha_tensor)
    }
}

fn take_states(outputs: &mut TensorMap) -> MattingResult<[ArrayD<f32>; 4]> {
    let mut take = |name: &str| {
        outputs
            .remove(name)
            .ok_or_else(|| MattingError::ContractViolation(format!("missing output '{}'", name)))
    };
    Ok([
        take(STATE_OUTPUTS[0])?,
        take(STATE_OUTPUTS[1])?,
        take(STATE_OUTPUTS[2])?,
        take(STATE_OUTPUTS[3])?,
    ])
}
