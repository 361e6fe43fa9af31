use super::backend::{probe_gpu, ExecutionBackend, GpuCapability};
use crate::error::{MattingError, MattingResult};
use crate::models::ResolvedModel;
use ndarray::{ArrayD, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use std::collections::HashMap;
use std::path::Path;

/// Named output tensors of one run
pub type TensorMap = HashMap<String, ArrayD<f32>>;

/// One loaded set of model weights bound to one backend
pub trait MatteSession: Send {
    /// Declared input names, in model order
    fn input_names(&self) -> Vec<String>;

    /// Declared output names, in model order
    fn output_names(&self) -> Vec<String>;

    /// Static `(width, height)` of an NCHW input, if the model fixes it
    fn input_dims(&self, _name: &str) -> Option<(u32, u32)> {
        None
    }

    /// Run inference; only `f32` tensors are exchanged
    fn run(&mut self, inputs: Vec<(String, ArrayD<f32>)>) -> MattingResult<TensorMap>;

    fn backend(&self) -> ExecutionBackend;
}

/// Builds sessions for the pool
pub trait SessionFactory: Send + Sync {
    /// Evaluated once per pool
    fn probe_gpu(&self) -> GpuCapability;

    fn create(
        &self,
        model: &ResolvedModel,
        backend: ExecutionBackend,
        threads: usize,
    ) -> MattingResult<Box<dyn MatteSession>>;
}

/// ONNX Runtime backed session
pub struct OrtSession {
    session: Session,
    backend: ExecutionBackend,
    inputs: Vec<(String, Vec<i64>)>,
    outputs: Vec<String>,
}

impl OrtSession {
    /// Load a model from an ONNX file
    ///
    /// GPU sessions register the CUDA provider with `error_on_failure`, so a
    /// broken CUDA install fails here instead of silently running on CPU; the
    /// pool then rebuilds the session for CPU.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        backend: ExecutionBackend,
        threads: usize,
    ) -> MattingResult<Self> {
        let path = model_path.as_ref();
        tracing::info!("Loading model from {} ({})", path.display(), backend);

        let load_err = |e: ort::Error| MattingError::ModelLoad {
            model: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut builder = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .with_intra_threads(threads.max(1))
            .map_err(load_err)?;

        if backend == ExecutionBackend::Gpu {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .build()
                    .error_on_failure()])
                .map_err(load_err)?;
        }

        let session = builder.commit_from_file(path).map_err(load_err)?;

        let inputs = session
            .inputs
            .iter()
            .map(|input| (input.name.clone(), tensor_dims(&input.input_type)))
            .collect();
        let outputs = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        tracing::info!("Model loaded successfully");

        Ok(Self {
            session,
            backend,
            inputs,
            outputs,
        })
    }
}

fn tensor_dims(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
        _ => Vec::new(),
    }
}

impl MatteSession for OrtSession {
    fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|(name, _)| name.clone()).collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn input_dims(&self, name: &str) -> Option<(u32, u32)> {
        let (_, dims) = self.inputs.iter().find(|(n, _)| n == name)?;
        // NCHW; dynamic axes are reported as -1
        match dims.as_slice() {
            [_, _, h, w] if *h > 0 && *w > 0 => Some((*w as u32, *h as u32)),
            _ => None,
        }
    }

    fn run(&mut self, inputs: Vec<(String, ArrayD<f32>)>) -> MattingResult<TensorMap> {
        let _span = tracing::debug_span!("inference").entered();

        let mut values = Vec::with_capacity(inputs.len());
        for (name, array) in inputs {
            let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
            let data: Vec<f32> = array.iter().copied().collect();
            values.push((name, Tensor::from_array((shape, data))?));
        }

        let outputs = self.session.run(values)?;

        let mut map = TensorMap::with_capacity(self.outputs.len());
        for name in &self.outputs {
            let Some(value) = outputs.get(name.as_str()) else {
                continue;
            };
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|e| {
                MattingError::ContractViolation(format!("output '{}': {}", name, e))
            })?;
            map.insert(name.clone(), array);
        }

        Ok(map)
    }

    fn backend(&self) -> ExecutionBackend {
        self.backend
    }
}

/// Factory producing [`OrtSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtSessionFactory;

impl SessionFactory for OrtSessionFactory {
    fn probe_gpu(&self) -> GpuCapability {
        probe_gpu()
    }

    fn create(
        &self,
        model: &ResolvedModel,
        backend: ExecutionBackend,
        threads: usize,
    ) -> MattingResult<Box<dyn MatteSession>> {
        let session = OrtSession::load(&model.path, backend, threads)?;
        Ok(Box::new(session))
    }
}
