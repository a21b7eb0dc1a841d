use ferritin_mace::MaceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Mace(#[from] MaceError),
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error("batch is missing required key `{0}`")]
    MissingBatchKey(&'static str),
    #[error("model trained with ESM {checkpoint}, but configured with {configured}")]
    EsmVersionMismatch {
        checkpoint: String,
        configured: String,
    },
    #[error("checkpoint holds no parameters")]
    EmptyCheckpoint,
    #[error("invalid flow model configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    SafeTensors(#[from] safetensors::SafeTensorError),
    #[error("scaffolding generation needs `{0}` in the batch")]
    MissingScaffoldInput(&'static str),
}

pub type Result<T> = std::result::Result<T, FlowError>;
