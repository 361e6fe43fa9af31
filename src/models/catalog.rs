//! Known model weights and the contracts they are run under

/// Identifier of a supported model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelId {
    /// Robust Video Matting, MobileNetV3 backbone (recurrent)
    RvmMobileNetV3,
    /// MODNet portrait matting (stateless, light)
    Modnet,
    /// BiRefNet portrait (stateless, high fidelity)
    BiRefNetPortrait,
    /// U²-Net human segmentation (legacy)
    U2NetHuman,
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelId::RvmMobileNetV3 => "rvm-mobilenetv3",
            ModelId::Modnet => "modnet",
            ModelId::BiRefNetPortrait => "birefnet-portrait",
            ModelId::U2NetHuman => "u2net-human",
        };
        f.write_str(name)
    }
}

/// Input resolution contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSize {
    Fixed { width: u32, height: u32 },
    /// Use the session's static input shape, or pick one if it is dynamic
    FromMetadata,
}

/// Relative execution cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CostTier {
    Light,
    Medium,
    Heavy,
}

/// Per-channel normalization: `(pixel / 255 - mean) / std`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    pub const UNIT: Normalization = Normalization {
        mean: [0.0; 3],
        std: [1.0; 3],
    };

    pub const SYMMETRIC: Normalization = Normalization {
        mean: [0.5; 3],
        std: [0.5; 3],
    };

    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };

    #[inline]
    pub fn apply(&self, channel: usize, value: u8) -> f32 {
        (f32::from(value) / 255.0 - self.mean[channel]) / self.std[channel]
    }
}

/// Immutable description of one model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub file_name: &'static str,
    pub input_size: InputSize,
    pub normalization: Normalization,
    pub cost: CostTier,
    pub recurrent: bool,
    /// Whether the model benefits enough from a GPU to request one
    pub prefers_gpu: bool,
    /// Image input name; `None` = first declared input
    pub input_name: Option<&'static str>,
    /// Alpha output name; `None` = first declared output
    pub alpha_output: Option<&'static str>,
}

pub const RVM_MOBILENETV3: ModelDescriptor = ModelDescriptor {
    id: ModelId::RvmMobileNetV3,
    file_name: "rvm_mobilenetv3_fp32.onnx",
    input_size: InputSize::FromMetadata,
    normalization: Normalization::UNIT,
    cost: CostTier::Medium,
    recurrent: true,
    prefers_gpu: true,
    input_name: Some("src"),
    alpha_output: Some("pha"),
};

pub const MODNET: ModelDescriptor = ModelDescriptor {
    id: ModelId::Modnet,
    file_name: "modnet_photographic_portrait_matting.onnx",
    input_size: InputSize::FromMetadata,
    normalization: Normalization::SYMMETRIC,
    cost: CostTier::Light,
    recurrent: false,
    prefers_gpu: true,
    input_name: None,
    alpha_output: None,
};

pub const BIREFNET_PORTRAIT: ModelDescriptor = ModelDescriptor {
    id: ModelId::BiRefNetPortrait,
    file_name: "birefnet_portrait.onnx",
    input_size: InputSize::Fixed {
        width: 1024,
        height: 1024,
    },
    normalization: Normalization::IMAGENET,
    cost: CostTier::Heavy,
    recurrent: false,
    prefers_gpu: true,
    input_name: None,
    alpha_output: None,
};

pub const U2NET_HUMAN: ModelDescriptor = ModelDescriptor {
    id: ModelId::U2NetHuman,
    file_name: "u2net_human_seg.onnx",
    input_size: InputSize::Fixed {
        width: 320,
        height: 320,
    },
    normalization: Normalization::IMAGENET,
    cost: CostTier::Medium,
    recurrent: false,
    prefers_gpu: false,
    input_name: None,
    alpha_output: None,
};

pub fn descriptor(id: ModelId) -> &'static ModelDescriptor {
    match id {
        ModelId::RvmMobileNetV3 => &RVM_MOBILENETV3,
        ModelId::Modnet => &MODNET,
        ModelId::BiRefNetPortrait => &BIREFNET_PORTRAIT,
        ModelId::U2NetHuman => &U2NET_HUMAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rvm_is_recurrent() {
        for id in [
            ModelId::RvmMobileNetV3,
            ModelId::Modnet,
            ModelId::BiRefNetPortrait,
            ModelId::U2NetHuman,
        ] {
            assert_eq!(descriptor(id).recurrent, id == ModelId::RvmMobileNetV3);
        }
    }

    #[test]
    fn test_normalization() {
        assert_eq!(Normalization::UNIT.apply(0, 255), 1.0);
        assert_eq!(Normalization::SYMMETRIC.apply(1, 0), -1.0);
        assert!((Normalization::IMAGENET.apply(2, 0) + 0.406 / 0.225).abs() < 1e-6);
    }
}
