//! molgraph-models
//!
//! Graph neural network estimators for molecular property prediction and
//! self-supervised molecular representation learning.
//!
//! ```shell
//! cargo run --example gnn_predictor
//! cargo run --example gnn_predictor --features metal
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;
use tracing::info;

pub mod error;
pub mod estimator;
pub mod models;
pub mod nn;
pub mod search;
pub mod training;

pub use error::{Error, Result};
pub use estimator::encoder::{EdgePredMolecularEncoder, EncoderConfig};
pub use estimator::predictor::{
    GnnMolecularPredictor, GraphPredictor, Prediction, PredictorConfig, RpgnnMolecularPredictor,
    TaskType,
};
pub use estimator::{LoadSummary, MolecularEstimator, ParameterStatus, TrainingConfig};
pub use models::{
    ArchParams, Architecture, EdgePred, EdgePredParams, Gnn, GnnParams, Rpgnn, RpgnnParams,
};
pub use search::{ParameterSpec, ParameterType, SearchSpace, ValueRange};

/// Pick a compute device. `None` prefers CUDA, then Metal, then the CPU.
///
/// Explicit names: `"cpu"`, `"cuda"`, `"cuda:N"`, `"metal"`, `"metal:N"`.
pub fn device(name: Option<&str>) -> Result<Device> {
    let Some(name) = name else {
        if cuda_is_available() {
            return Ok(Device::new_cuda(0)?);
        } else if metal_is_available() {
            return Ok(Device::new_metal(0)?);
        }
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            info!("Running on CPU, to run on GPU(metal), build with `--features metal`");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            info!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        return Ok(Device::Cpu);
    };

    let (kind, ordinal) = match name.split_once(':') {
        Some((kind, idx)) => {
            let ordinal = idx.parse::<usize>().map_err(|_| {
                Error::InvalidParameter(format!("invalid device ordinal in `{name}`"))
            })?;
            (kind, ordinal)
        }
        None => (name, 0),
    };
    match kind {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(ordinal)?),
        "metal" | "mps" => Ok(Device::new_metal(ordinal)?),
        other => Err(Error::InvalidParameter(format!(
            "unknown device `{other}`; expected cpu, cuda[:N] or metal[:N]"
        ))),
    }
}
