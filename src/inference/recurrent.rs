use crate::error::{MattingError, MattingResult};
use ndarray::{Array4, ArrayD, Ix4};

/// Channel counts of the four hidden states `r1..r4`
pub const RECURRENT_CHANNELS: [usize; 4] = [16, 20, 40, 64];

pub const STATE_INPUTS: [&str; 4] = ["r1i", "r2i", "r3i", "r4i"];
pub const STATE_OUTPUTS: [&str; 4] = ["r1o", "r2o", "r3o", "r4o"];

/// Temporal memory of the recurrent video matting model
///
/// The tensors are carried from one streaming inference to the next. They
/// start as `[1, C, 1, 1]` zeros and afterwards take whatever spatial extent
/// the model returns; batch and channel layout never change. Updates are all
/// or nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    tensors: [Array4<f32>; 4],
    working_size: Option<(u32, u32)>,
    updates: u64,
}

impl Default for RecurrentState {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl RecurrentState {
    pub fn zeroed() -> Self {
        Self {
            tensors: RECURRENT_CHANNELS.map(|c| Array4::zeros((1, c, 1, 1))),
            working_size: None,
            updates: 0,
        }
    }

    pub fn reset(&mut self) {
        tracing::debug!("Resetting recurrent state");
        *self = Self::zeroed();
    }

    pub fn tensors(&self) -> &[Array4<f32>; 4] {
        &self.tensors
    }

    /// Number of successful replacements since the last reset
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Memory from one working resolution is meaningless at another; reset
    /// when the size changes. Returns true if a reset happened.
    pub fn bind_working_size(&mut self, size: (u32, u32)) -> bool {
        match self.working_size {
            Some(current) if current == size => false,
            Some(_) => {
                self.reset();
                self.working_size = Some(size);
                true
            }
            None => {
                self.working_size = Some(size);
                false
            }
        }
    }

    /// Named inputs for the next inference
    pub fn as_inputs(&self) -> Vec<(String, ArrayD<f32>)> {
        STATE_INPUTS
            .iter()
            .zip(&self.tensors)
            .map(|(name, tensor)| (name.to_string(), tensor.clone().into_dyn()))
            .collect()
    }

    /// Replace all four tensors; on any shape error nothing is changed
    pub fn replace(&mut self, next: [ArrayD<f32>; 4]) -> MattingResult<()> {
        let mut validated: Vec<Array4<f32>> = Vec::with_capacity(4);
        for ((tensor, &channels), name) in next.into_iter().zip(&RECURRENT_CHANNELS).zip(STATE_OUTPUTS) {
            let shape = tensor.shape().to_vec();
            let tensor = tensor.into_dimensionality::<Ix4>().map_err(|_| {
                MattingError::ContractViolation(format!("{} has rank {}, expected 4", name, shape.len()))
            })?;
            if tensor.shape()[0] != 1 || tensor.shape()[1] != channels {
                return Err(MattingError::ContractViolation(format!(
                    "{} has shape {:?}, expected [1, {}, h, w]",
                    name, shape, channels
                )));
            }
            validated.push(tensor);
        }

        for (slot, tensor) in self.tensors.iter_mut().zip(validated) {
            *slot = tensor;
        }
        self.updates += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn outputs(h: usize, w: usize, value: f32) -> [ArrayD<f32>; 4] {
        RECURRENT_CHANNELS.map(|c| ArrayD::from_elem(IxDyn(&[1, c, h, w]), value))
    }

    #[test]
    fn test_zeroed_shapes() {
        let state = RecurrentState::zeroed();
        for (tensor, &c) in state.tensors().iter().zip(&RECURRENT_CHANNELS) {
            assert_eq!(tensor.shape(), &[1, c, 1, 1]);
            assert!(tensor.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_replace_keeps_channel_layout() {
        let mut state = RecurrentState::zeroed();
        for step in 0..10 {
            state.replace(outputs(8, 12, step as f32)).unwrap();
            for (tensor, &c) in state.tensors().iter().zip(&RECURRENT_CHANNELS) {
                assert_eq!(tensor.shape(), &[1, c, 8, 12]);
            }
        }
        assert_eq!(state.updates(), 10);
    }

    #[test]
    fn test_bad_replacement_is_all_or_nothing() {
        let mut state = RecurrentState::zeroed();
        state.replace(outputs(4, 4, 1.0)).unwrap();
        let before = state.clone();

        let mut bad = outputs(4, 4, 2.0);
        bad[3] = ArrayD::zeros(IxDyn(&[1, 3, 4, 4]));
        assert!(matches!(state.replace(bad), Err(MattingError::ContractViolation(_))));
        assert_eq!(state, before);

        let mut wrong_rank = outputs(4, 4, 2.0);
        wrong_rank[0] = ArrayD::zeros(IxDyn(&[16, 4, 4]));
        assert!(state.replace(wrong_rank).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_working_size_change_resets() {
        let mut state = RecurrentState::zeroed();
        assert!(!state.bind_working_size((256, 144)));
        state.replace(outputs(72, 128, 0.5)).unwrap();
        assert!(!state.bind_working_size((256, 144)));
        assert_eq!(state.updates(), 1);
        assert!(state.bind_working_size((320, 176)));
        assert_eq!(state.updates(), 0);
        assert_eq!(state.tensors()[0].shape(), &[1, 16, 1, 1]);
    }
}
