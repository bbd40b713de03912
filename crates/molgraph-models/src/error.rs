use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Core(#[from] molgraph_core::MolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] validator::ValidationErrors),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("This estimator is not fitted yet. Call `fit` before using it.")]
    NotFitted,

    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("No model file at {0} and no repository id to download from")]
    ModelNotFound(PathBuf),

    #[error("Failed to download {file} from {repo}: {reason}")]
    Download {
        repo: String,
        file: String,
        reason: String,
    },

    #[error("Hyperparameter search failed: {0}")]
    Search(String),

    #[error("Training failed: {0}")]
    Training(String),
}

pub type Result<T> = std::result::Result<T, Error>;
