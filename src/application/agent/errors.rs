use crate::application::tooling::RegistryError;
use crate::infrastructure::model::InferenceError;
use crate::infrastructure::retrieval::RetrievalError;
use thiserror::Error;

/// A single step's failure. Recorded on the step and counted against the
/// consecutive-failure budget; never fatal to the run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("tool call failed: {0}")]
    Tool(#[from] RegistryError),
    #[error("tool reported an error: {0}")]
    ToolReported(String),
    #[error("knowledge retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("knowledge service reported an error: {0}")]
    RetrievalReported(String),
    #[error("reasoning call failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("step type '{0}' cannot be executed")]
    Unsupported(&'static str),
}
