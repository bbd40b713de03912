use thiserror::Error;

/// Error raised while reading a SMILES string. `position` is a character offset.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason} (at position {position})")]
pub struct SmilesError {
    pub position: usize,
    pub reason: String,
}

impl SmilesError {
    pub(crate) fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MolError {
    #[error("SMILES parse error: {0}")]
    Smiles(#[from] SmilesError),

    #[error("Invalid SMILES found:\n{}", .0.join("\n"))]
    InvalidSmiles(Vec<String>),

    #[error("Invalid targets: {0}")]
    Targets(String),

    #[error("Metric error: {0}")]
    Metric(String),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, MolError>;
