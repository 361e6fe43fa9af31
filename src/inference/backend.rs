use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use std::fmt;

/// Where a session executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionBackend {
    Cpu,
    Gpu,
}

impl fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionBackend::Cpu => f.write_str("cpu"),
            ExecutionBackend::Gpu => f.write_str("gpu"),
        }
    }
}

/// Result of the GPU capability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCapability {
    Available,
    Unavailable(String),
}

impl GpuCapability {
    pub fn is_available(&self) -> bool {
        matches!(self, GpuCapability::Available)
    }
}

/// Ask ONNX Runtime whether the CUDA provider can be registered
pub fn probe_gpu() -> GpuCapability {
    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => GpuCapability::Available,
        Ok(false) => GpuCapability::Unavailable("CUDA execution provider not available".into()),
        Err(e) => GpuCapability::Unavailable(e.to_string()),
    }
}
