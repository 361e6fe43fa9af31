//! Inference sessions: backend selection, pooling and recurrent state
//!
//! Everything model-specific above this module talks to a [`MatteSession`],
//! a named-tensor-in / named-tensor-out handle. The production implementation
//! wraps an ONNX Runtime session; tests plug in their own.

mod backend;
mod pool;
mod recurrent;
mod session;

pub use backend::{probe_gpu, ExecutionBackend, GpuCapability};
pub use pool::{AcquiredSession, SessionPool, SharedSession};
pub use recurrent::{RecurrentState, RECURRENT_CHANNELS, STATE_INPUTS, STATE_OUTPUTS};
pub use session::{MatteSession, OrtSession, OrtSessionFactory, SessionFactory, TensorMap};

use std::fmt;

/// What a session is used for; each purpose owns an independent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPurpose {
    /// High-fidelity single image
    Still,
    /// Stateless live-view model, also the degenerate-frame fallback
    LiveFallback,
    /// Recurrent video matting
    Recurrent,
}

impl SessionPurpose {
    pub const ALL: [SessionPurpose; 3] = [
        SessionPurpose::Still,
        SessionPurpose::LiveFallback,
        SessionPurpose::Recurrent,
    ];

    fn slot(self) -> usize {
        match self {
            SessionPurpose::Still => 0,
            SessionPurpose::LiveFallback => 1,
            SessionPurpose::Recurrent => 2,
        }
    }
}

impl fmt::Display for SessionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPurpose::Still => "still",
            SessionPurpose::LiveFallback => "live-fallback",
            SessionPurpose::Recurrent => "recurrent",
        };
        f.write_str(name)
    }
}
