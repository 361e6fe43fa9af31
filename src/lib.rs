//! Real-time human-foreground matting
//!
//! A live preview submits frames to a [`MattingService`] and gets bytes back
//! immediately; inference runs on a small worker pool and the result shows
//! up on a later submission. Still captures run synchronously on a higher
//! fidelity model. Both paths post-process the raw alpha and composite the
//! foreground over a cover-cropped background.

pub mod alpha;
pub mod compose;
pub mod config;
pub mod error;
pub mod frame;
pub mod inference;
pub mod models;
pub mod scheduler;
pub mod segmentation;
pub mod service;

pub use config::{
    ConfigSource, MattingConfig, QualityTier, SharedConfig, StreamingMode, TomlConfigFile,
};
pub use error::{MattingError, MattingResult};
pub use frame::{Frame, FrameEncoding};
pub use scheduler::{FrameInfo, FrameScheduler, PipelineKind};
pub use service::{
    MattingService, ServiceState, StillOutput, StillRequest, StillResult, StillSource,
};
