use super::scheduler::ReduceLrOnPlateau;
use candle_core::{Result, Tensor, Var};
use candle_nn::{Optimizer, VarMap};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    /// Epochs without improvement tolerated before stopping.
    pub patience: usize,
    pub higher_better: bool,
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Mean training loss of every epoch that ran.
    pub fitting_loss: Vec<f32>,
    /// Epoch whose weights were kept.
    pub fitting_epoch: usize,
    pub best_score: Option<f32>,
    pub stopped_early: bool,
}

fn sorted_vars(varmap: &VarMap) -> Result<Vec<Var>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".into()))?;
    let mut named: Vec<(&String, &Var)> = data.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));
    Ok(named.into_iter().map(|(_, var)| var.clone()).collect())
}

/// Every variable of `varmap`, flattened and concatenated in name order.
/// The result owns its storage, so later updates do not alter it.
pub fn parameters_to_vector(varmap: &VarMap) -> Result<Tensor> {
    let flat = sorted_vars(varmap)?
        .iter()
        .map(|var| var.as_tensor().flatten_all())
        .collect::<Result<Vec<_>>>()?;
    Tensor::cat(&flat, 0)?.copy()
}

/// Inverse of [`parameters_to_vector`].
pub fn vector_to_parameters(vector: &Tensor, varmap: &VarMap) -> Result<()> {
    let vars = sorted_vars(varmap)?;
    let expected: usize = vars.iter().map(|v| v.elem_count()).sum();
    if vector.elem_count() != expected {
        candle_core::bail!(
            "parameter vector has {} elements, model has {expected}",
            vector.elem_count()
        );
    }
    let mut offset = 0;
    for var in vars {
        let n = var.elem_count();
        let slice = vector.narrow(0, offset, n)?.reshape(var.shape())?;
        var.set(&slice)?;
        offset += n;
    }
    Ok(())
}

/// Epoch loop with early stopping and best-checkpoint restore.
///
/// Each epoch runs `train_epoch`, records its mean loss, scores the model with
/// `evaluate` and steps the scheduler on that score. A strictly better score
/// (never NaN) snapshots every variable; otherwise the wait counter grows and
/// training stops once it exceeds `patience`. The best snapshot is written
/// back before returning.
pub fn fit_loop<O, T, E>(
    config: &FitConfig,
    varmap: &VarMap,
    optimizer: &mut O,
    mut scheduler: Option<ReduceLrOnPlateau>,
    mut train_epoch: T,
    mut evaluate: E,
) -> Result<FitOutcome>
where
    O: Optimizer,
    T: FnMut(&mut O, usize) -> Result<f32>,
    E: FnMut(usize) -> Result<f32>,
{
    let mut fitting_loss = Vec::with_capacity(config.epochs);
    let mut fitting_epoch = 0;
    let mut best_score: Option<f32> = None;
    let mut snapshot: Option<Tensor> = None;
    let mut wait = 0;
    let mut stopped_early = false;

    for epoch in 0..config.epochs {
        let loss = train_epoch(optimizer, epoch)?;
        fitting_loss.push(loss);
        let score = evaluate(epoch)?;

        if let Some(scheduler) = scheduler.as_mut() {
            scheduler.step(score as f64, optimizer);
        }

        let improved = !score.is_nan()
            && best_score.map_or(true, |best| {
                if config.higher_better {
                    score > best
                } else {
                    score < best
                }
            });

        if config.verbose && epoch % 10 == 0 {
            info!(
                epoch,
                loss,
                score,
                lr = optimizer.learning_rate(),
                "epoch {epoch}: loss = {loss:.4}, evaluation = {score:.4}"
            );
        }

        if improved {
            best_score = Some(score);
            fitting_epoch = epoch;
            snapshot = Some(parameters_to_vector(varmap)?);
            wait = 0;
        } else {
            wait += 1;
            if wait > config.patience {
                if config.verbose {
                    info!("Early stopping at epoch {epoch}");
                }
                stopped_early = true;
                break;
            }
        }
    }

    match snapshot {
        Some(best) => vector_to_parameters(&best, varmap)?,
        None => warn!(
            "No improvement was achieved during training; keeping the weights of the final epoch"
        ),
    }

    Ok(FitOutcome {
        fitting_loss,
        fitting_epoch,
        best_score,
        stopped_early,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{Adam, ParamsAdam};
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    fn varmap() -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        vb.get_with_hints((2, 2), "b.weight", Init::Const(1.0)).unwrap();
        vb.get_with_hints(3, "a.bias", Init::Const(2.0)).unwrap();
        varmap
    }

    #[test]
    fn test_vector_round_trip() -> Result<()> {
        let varmap = varmap();
        let vector = parameters_to_vector(&varmap)?;
        // name order puts a.bias first
        assert_eq!(vector.to_vec1::<f32>()?, vec![2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0]);

        let zeros = vector.zeros_like()?;
        vector_to_parameters(&zeros, &varmap)?;
        // snapshot is unaffected by the overwrite
        assert_eq!(vector.to_vec1::<f32>()?[0], 2.0);
        vector_to_parameters(&vector, &varmap)?;
        assert_eq!(parameters_to_vector(&varmap)?.to_vec1::<f32>()?, vector.to_vec1::<f32>()?);

        let short = Tensor::zeros(3, DType::F32, &Device::Cpu)?;
        assert!(vector_to_parameters(&short, &varmap).is_err());
        Ok(())
    }

    #[test]
    fn test_early_stopping_restores_best() -> Result<()> {
        let varmap = varmap();
        let mut opt = Adam::new(varmap.all_vars(), ParamsAdam::default())?;
        let scores = [0.5f32, 0.7, 0.6, 0.65, 0.4, 0.9];
        let vars = varmap.all_vars();
        let config = FitConfig {
            epochs: 6,
            patience: 2,
            higher_better: true,
            verbose: false,
        };
        let outcome = fit_loop(
            &config,
            &varmap,
            &mut opt,
            None,
            |_, epoch| {
                // mark the weights with the epoch number
                for var in &vars {
                    var.set(&var.as_tensor().ones_like()?.affine(0.0, epoch as f64)?)?;
                }
                Ok(epoch as f32)
            },
            |epoch| Ok(scores[epoch]),
        )?;
        assert!(outcome.stopped_early);
        assert_eq!(outcome.fitting_loss, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(outcome.fitting_epoch, 1);
        assert_eq!(outcome.best_score, Some(0.7));
        let restored = parameters_to_vector(&varmap)?.to_vec1::<f32>()?;
        assert!(restored.iter().all(|&v| v == 1.0));
        Ok(())
    }

    #[test]
    fn test_nan_scores_never_improve() -> Result<()> {
        let varmap = varmap();
        let mut opt = Adam::new(varmap.all_vars(), ParamsAdam::default())?;
        let config = FitConfig {
            epochs: 3,
            patience: 10,
            higher_better: false,
            verbose: true,
        };
        let outcome = fit_loop(
            &config,
            &varmap,
            &mut opt,
            Some(ReduceLrOnPlateau::new(false, 0.5, 0)),
            |_, _| Ok(1.0),
            |_| Ok(f32::NAN),
        )?;
        assert_eq!(outcome.best_score, None);
        assert_eq!(outcome.fitting_loss.len(), 3);
        assert!(!outcome.stopped_early);
        Ok(())
    }
}
