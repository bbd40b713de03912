//! Concrete graph architectures.
mod edgepred;
mod gnn;
mod rpgnn;

pub use edgepred::{EdgePred, EdgePredParams};
pub use gnn::{Gnn, GnnParams};
pub use rpgnn::{Rpgnn, RpgnnParams};

use crate::search::SearchSpace;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use molgraph_core::GraphBatch;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use validator::Validate;

/// Architecture hyperparameters: a flat serde struct with validation rules.
pub trait ArchParams:
    Serialize + DeserializeOwned + Validate + Default + Clone + Debug + PartialEq
{
}

impl<T> ArchParams for T where
    T: Serialize + DeserializeOwned + Validate + Default + Clone + Debug + PartialEq
{
}

/// A supervised graph model producing one logit per task.
pub trait Architecture: Sized {
    type Params: ArchParams;

    /// Default `model_name` of estimators built on this architecture.
    const MODEL_NAME: &'static str;

    /// `seed` initialises any random state the model draws from during
    /// training forward passes.
    fn load(vb: VarBuilder, params: &Self::Params, num_tasks: usize, seed: u64) -> Result<Self>;

    /// `[num_graphs, num_tasks]` logits.
    fn forward_t(&self, batch: &GraphBatch, train: bool) -> Result<Tensor>;

    /// Inference-time logits.
    fn predict(&self, batch: &GraphBatch) -> Result<Tensor> {
        self.forward_t(batch, false)
    }

    /// Default search space over the architecture hyperparameters.
    fn search_space() -> SearchSpace;
}
