//! Error types for the matting core

use crate::inference::SessionPurpose;
use thiserror::Error;

/// Matting error types
#[derive(Error, Debug)]
pub enum MattingError {
    /// No model weights could be located for the requested purpose
    #[error("No model available for {purpose}")]
    Unavailable { purpose: SessionPurpose },

    /// Matting is switched off in the configuration
    #[error("Matting is disabled")]
    Disabled,

    /// Session missing, torn down, or still initializing
    #[error("Engine not ready: {0}")]
    NotReady(String),

    /// Model produced something other than the documented tensors
    #[error("Inference contract violation: {0}")]
    ContractViolation(String),

    /// Mask and image disagree on size after the recovery resize
    #[error(
        "Mask {mask_width}x{mask_height} does not match image {image_width}x{image_height}"
    )]
    DimensionMismatch {
        mask_width: u32,
        mask_height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Model loading failed
    #[error("Failed to load model {model}: {reason}")]
    ModelLoad { model: String, reason: String },

    /// Inference failed inside the runtime
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Frame bytes do not describe an image of the announced size
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker threads for detached frame tasks could not be started
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ort::Error> for MattingError {
    fn from(err: ort::Error) -> Self {
        MattingError::Inference(err.to_string())
    }
}

impl MattingError {
    /// Whether the caller should silently pass the input through
    pub fn is_passthrough(&self) -> bool {
        matches!(
            self,
            MattingError::Unavailable { .. }
                | MattingError::Disabled
                | MattingError::NotReady(_)
                | MattingError::ContractViolation(_)
        )
    }
}

/// Result type for matting operations
pub type MattingResult<T> = Result<T, MattingError>;
