//! Optimisation machinery shared by every estimator.
mod fit;
mod loss;
mod optim;
mod scheduler;

pub use fit::{fit_loop, parameters_to_vector, vector_to_parameters, FitConfig, FitOutcome};
pub use loss::{masked_loss, LossCriterion};
pub use optim::{clip_grad_norm, Adam, ParamsAdam};
pub use scheduler::ReduceLrOnPlateau;
