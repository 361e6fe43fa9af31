pub mod advisor;
mod engine;
mod preprocess;
mod rvm;
pub mod types;

pub use advisor::{
    align_to_multiple, compute_ratio, scaled_dimension, still_working_size, DownsampleAdvisor,
};
pub use engine::{model_input_size, MatteInferenceEngine, SizePolicy};
pub use preprocess::Preprocessor;
pub use types::AlphaMask;
