#![allow(dead_code)]

use livematte::config::{MattingConfig, SharedConfig};
use livematte::error::{MattingError, MattingResult};
use livematte::inference::{
    ExecutionBackend, GpuCapability, MatteSession, SessionFactory, TensorMap, RECURRENT_CHANNELS,
    STATE_OUTPUTS,
};
use livematte::models::{ModelDescriptor, ModelId, ModelRegistry, ResolvedModel};
use livematte::{Frame, MattingService};
use image::{Rgb, RgbImage};
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// What the fake model puts in its alpha output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlphaPattern {
    /// Opaque subject in the centre, transparent border
    Subject,
    /// Almost empty matte
    Degenerate,
    /// The alpha output is left out altogether
    Missing,
}

fn pattern_alpha(pattern: AlphaPattern, height: usize, width: usize) -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[1, 1, height, width]), |index| {
        let (y, x) = (index[2], index[3]);
        match pattern {
            AlphaPattern::Degenerate | AlphaPattern::Missing => 0.0,
            AlphaPattern::Subject => {
                let center = x * 4 >= width && x * 4 < 3 * width && y * 4 >= height && y * 4 < 3 * height;
                if center {
                    1.0
                } else {
                    0.0
                }
            }
        }
    })
}

/// What the fake sessions were asked to do
#[derive(Default)]
pub struct Recorder {
    pub runs: AtomicUsize,
    pub concurrent: AtomicUsize,
    pub max_concurrent: AtomicUsize,
    pub input_shapes: Mutex<Vec<(ModelId, Vec<usize>)>>,
    pub state_shapes: Mutex<Vec<Vec<usize>>>,
}

impl Recorder {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn last_input_shape(&self, id: ModelId) -> Option<Vec<usize>> {
        self.input_shapes
            .lock()
            .iter()
            .rev()
            .find(|(model, _)| *model == id)
            .map(|(_, shape)| shape.clone())
    }
}

pub struct FakeSession {
    descriptor: &'static ModelDescriptor,
    backend: ExecutionBackend,
    delay: Duration,
    pattern: AlphaPattern,
    stateless_pattern: AlphaPattern,
    panics: bool,
    recorder: Arc<Recorder>,
}

impl MatteSession for FakeSession {
    fn input_names(&self) -> Vec<String> {
        if self.descriptor.recurrent {
            ["src", "r1i", "r2i", "r3i", "r4i", "downsample_ratio"]
                .map(String::from)
                .to_vec()
        } else {
            vec!["input".into()]
        }
    }

    fn output_names(&self) -> Vec<String> {
        if self.descriptor.recurrent {
            ["fgr", "pha", "r1o", "r2o", "r3o", "r4o"]
                .map(String::from)
                .to_vec()
        } else {
            vec!["output".into()]
        }
    }

    fn run(&mut self, inputs: Vec<(String, ArrayD<f32>)>) -> MattingResult<TensorMap> {
        let now = self.recorder.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.recorder.runs.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.panics {
            self.recorder.concurrent.fetch_sub(1, Ordering::SeqCst);
            panic!("session crashed on purpose");
        }

        let image = &inputs
            .first()
            .ok_or_else(|| MattingError::ContractViolation("no input".into()))?
            .1;
        let shape = image.shape().to_vec();
        self.recorder
            .input_shapes
            .lock()
            .push((self.descriptor.id, shape.clone()));
        for (name, tensor) in &inputs {
            if name.starts_with('r') && name.ends_with('i') {
                self.recorder.state_shapes.lock().push(tensor.shape().to_vec());
            }
        }

        let (height, width) = (shape[2], shape[3]);
        let mut outputs = TensorMap::new();
        if self.descriptor.recurrent {
            if self.pattern != AlphaPattern::Missing {
                outputs.insert("pha".into(), pattern_alpha(self.pattern, height, width));
            }
            // Single-channel fgr is not a valid foreground; it must be ignored
            outputs.insert(
                "fgr".into(),
                ArrayD::zeros(IxDyn(&[1, 1, height, width])),
            );
            for (name, channels) in STATE_OUTPUTS.iter().zip(RECURRENT_CHANNELS) {
                outputs.insert(
                    name.to_string(),
                    ArrayD::from_elem(IxDyn(&[1, channels, 2, 2]), 0.5),
                );
            }
        } else if self.stateless_pattern != AlphaPattern::Missing {
            outputs.insert(
                "output".into(),
                pattern_alpha(self.stateless_pattern, height, width),
            );
        }

        self.recorder.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(outputs)
    }

    fn backend(&self) -> ExecutionBackend {
        self.backend
    }
}

pub struct FakeFactory {
    pub recorder: Arc<Recorder>,
    pub delay: Duration,
    /// Applied to the recurrent model
    pub pattern: AlphaPattern,
    /// Applied to the stateless models; a subject unless overridden
    pub stateless_pattern: AlphaPattern,
    /// Every run panics after recording itself
    pub panics: bool,
}

impl FakeFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            recorder: Arc::new(Recorder::default()),
            delay,
            pattern: AlphaPattern::Subject,
            stateless_pattern: AlphaPattern::Subject,
            panics: false,
        }
    }

    pub fn with_pattern(mut self, pattern: AlphaPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_stateless_pattern(mut self, pattern: AlphaPattern) -> Self {
        self.stateless_pattern = pattern;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

impl SessionFactory for FakeFactory {
    fn probe_gpu(&self) -> GpuCapability {
        GpuCapability::Unavailable("test".into())
    }

    fn create(
        &self,
        model: &ResolvedModel,
        backend: ExecutionBackend,
        _threads: usize,
    ) -> MattingResult<Box<dyn MatteSession>> {
        Ok(Box::new(FakeSession {
            descriptor: model.descriptor,
            backend,
            delay: self.delay,
            pattern: self.pattern,
            stateless_pattern: self.stateless_pattern,
            panics: self.panics,
            recorder: Arc::clone(&self.recorder),
        }))
    }
}

/// Temporary model directory holding (empty) weight files for `ids`
pub fn model_dir(ids: &[ModelId]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for id in ids {
        let name = livematte::models::descriptor(*id).file_name;
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    dir
}

pub fn service(
    models: &Path,
    config: MattingConfig,
    factory: FakeFactory,
) -> (MattingService, SharedConfig, Arc<Recorder>) {
    let recorder = Arc::clone(&factory.recorder);
    let shared = SharedConfig::new(MattingConfig {
        model_dirs: vec![models.to_path_buf()],
        use_gpu: false,
        ..config
    });
    let service = MattingService::with_registry(
        Arc::new(shared.clone()),
        ModelRegistry::from_dirs([models]),
        Arc::new(factory),
    )
    .unwrap();
    (service, shared, recorder)
}

pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

pub fn rgb_frame(width: u32, height: u32) -> Frame {
    Frame::from_rgb(gradient(width, height))
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
