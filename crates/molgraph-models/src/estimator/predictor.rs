//! Supervised graph property predictors.
use validator::Validate;
use super::checkpoint::{load_weights, Checkpoint};
use super::{config_params, merge_params, JsonConfig, MolecularEstimator, TrainingConfig};
use crate::error::{Error, Result};
use crate::models::{ArchParams, Architecture, Gnn, Rpgnn};
use crate::search::{Direction, ParameterSpec, SearchSpace, Study, TpeSampler, TrialState};
use crate::training::{
    clip_grad_norm, fit_loop, masked_loss, Adam, FitConfig, LossCriterion, ParamsAdam,
    ReduceLrOnPlateau,
};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use molgraph_core::{validate_inputs, GraphFeatures, GraphLoader, Metric, MolGraph, Targets};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString};
use tracing::{info, warn};

/// Custom evaluation function `(y_true, y_pred) -> score`.
pub type EvaluateFn = Arc<dyn Fn(&Array2<f32>, &Array2<f32>) -> f32 + Send + Sync>;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskType {
    #[default]
    Classification,
    Regression,
}

impl TaskType {
    pub fn default_loss(&self) -> LossCriterion {
        match self {
            TaskType::Classification => LossCriterion::BceWithLogits,
            TaskType::Regression => LossCriterion::L1,
        }
    }

    pub fn default_metric(&self) -> Metric {
        match self {
            TaskType::Classification => Metric::RocAuc,
            TaskType::Regression => Metric::Mae,
        }
    }
}

fn one() -> usize {
    1
}

/// Settings of a [`GraphPredictor`]. Architecture and training fields are
/// flattened so every setting has a single top-level name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig<P> {
    #[serde(default = "one")]
    pub num_tasks: usize,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(flatten)]
    pub arch: P,
    #[serde(flatten)]
    pub training: TrainingConfig,
    /// Defaults to BCE with logits for classification and L1 for regression.
    #[serde(default)]
    pub loss_criterion: Option<LossCriterion>,
    /// Defaults to ROC AUC for classification and MAE for regression.
    #[serde(default)]
    pub evaluate_criterion: Option<Metric>,
    /// Defaults to the direction of the evaluation metric.
    #[serde(default)]
    pub evaluate_higher_better: Option<bool>,
    /// `None` picks the best available accelerator.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    /// Empty means the architecture's default name.
    #[serde(default)]
    pub model_name: String,
}

impl<P: Default> Default for PredictorConfig<P> {
    fn default() -> Self {
        Self {
            num_tasks: 1,
            task_type: TaskType::default(),
            arch: P::default(),
            training: TrainingConfig::default(),
            loss_criterion: None,
            evaluate_criterion: None,
            evaluate_higher_better: None,
            device: None,
            verbose: false,
            model_name: String::new(),
        }
    }
}

impl<P: ArchParams> JsonConfig for PredictorConfig<P> {}

impl<P: ArchParams> PredictorConfig<P> {
    pub fn validate(&self) -> Result<()> {
        if self.num_tasks < 1 {
            return Err(Error::InvalidParameter("num_tasks must be at least 1".into()));
        }
        self.arch.validate()?;
        self.training.validate()?;
        Ok(())
    }

    pub fn loss(&self) -> LossCriterion {
        self.loss_criterion
            .unwrap_or_else(|| self.task_type.default_loss())
    }

    pub fn metric(&self) -> Metric {
        self.evaluate_criterion
            .unwrap_or_else(|| self.task_type.default_metric())
    }
}

/// Output of [`GraphPredictor::predict`].
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// `[n_samples, num_tasks]`; probabilities for classification.
    pub prediction: Array2<f32>,
}

/// A supervised estimator around an [`Architecture`].
pub struct GraphPredictor<A: Architecture> {
    config: PredictorConfig<A::Params>,
    evaluate_fn: Option<(String, EvaluateFn, bool)>,
    model: Option<A>,
    varmap: Option<VarMap>,
    fitting_loss: Vec<f32>,
    fitting_epoch: usize,
    best_score: Option<f64>,
    is_fitted: bool,
}

/// GIN/GCN predictor with optional virtual node.
pub type GnnMolecularPredictor = GraphPredictor<Gnn>;

/// Relational pooling predictor.
pub type RpgnnMolecularPredictor = GraphPredictor<Rpgnn>;

/// Weights and settings of the best autofit trial.
struct BestTrial<A: Architecture> {
    number: usize,
    score: f64,
    params: Map<String, Value>,
    config: PredictorConfig<A::Params>,
    model: Option<A>,
    varmap: Option<VarMap>,
    fitting_loss: Vec<f32>,
    fitting_epoch: usize,
}

impl<A: Architecture> GraphPredictor<A> {
    pub fn new(mut config: PredictorConfig<A::Params>) -> Result<Self> {
        config.validate()?;
        if config.model_name.is_empty() {
            config.model_name = A::MODEL_NAME.to_string();
        }
        Ok(Self {
            config,
            evaluate_fn: None,
            model: None,
            varmap: None,
            fitting_loss: Vec::new(),
            fitting_epoch: 0,
            best_score: None,
            is_fitted: false,
        })
    }

    /// Replace the evaluation metric by a custom function. Its direction must
    /// be given explicitly.
    pub fn with_evaluate_fn<F>(mut self, name: &str, evaluate: F, higher_better: bool) -> Self
    where
        F: Fn(&Array2<f32>, &Array2<f32>) -> f32 + Send + Sync + 'static,
    {
        self.evaluate_fn = Some((name.to_string(), Arc::new(evaluate), higher_better));
        self
    }

    pub fn config(&self) -> &PredictorConfig<A::Params> {
        &self.config
    }

    pub fn model(&self) -> Option<&A> {
        self.model.as_ref()
    }

    /// Mean training loss per epoch of the last fit.
    pub fn fitting_loss(&self) -> &[f32] {
        &self.fitting_loss
    }

    /// Epoch whose weights were kept by the last fit.
    pub fn fitting_epoch(&self) -> usize {
        self.fitting_epoch
    }

    /// Evaluation score of the trial kept by the last [`Self::autofit`].
    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    pub fn evaluate_name(&self) -> String {
        match &self.evaluate_fn {
            Some((name, _, _)) => name.clone(),
            None => self.config.metric().to_string(),
        }
    }

    pub fn evaluate_higher_better(&self) -> bool {
        match &self.evaluate_fn {
            Some((_, _, higher_better)) => *higher_better,
            None => self
                .config
                .evaluate_higher_better
                .unwrap_or_else(|| self.config.metric().higher_is_better()),
        }
    }

    /// Architecture search space plus the optimiser rates.
    pub fn default_search_space() -> SearchSpace {
        let mut space = A::search_space();
        space.insert("learning_rate".into(), ParameterSpec::log_float(1e-5, 1e-2));
        space.insert("weight_decay".into(), ParameterSpec::log_float(1e-10, 1e-3));
        space
    }

    fn device(&self) -> Result<Device> {
        crate::device(self.config.device.as_deref())
    }

    fn build(config: &PredictorConfig<A::Params>, device: &Device) -> Result<(VarMap, A)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = A::load(vb, &config.arch, config.num_tasks, config.training.seed)?;
        Ok((varmap, model))
    }

    fn featurize<S: AsRef<str>>(&self, x: &[S], y: Option<&Targets>) -> Result<Vec<MolGraph>> {
        let (molecules, y) = validate_inputs(x, y, self.config.num_tasks)?;
        Ok(molecules
            .iter()
            .enumerate()
            .map(|(idx, mol)| {
                let graph = mol.to_graph();
                match &y {
                    Some(y) => graph.with_targets(y.row(idx)),
                    None => graph,
                }
            })
            .collect())
    }

    fn score(&self, labels: &Array2<f32>, predictions: &Array2<f32>) -> Result<f32> {
        match &self.evaluate_fn {
            Some((_, evaluate, _)) => Ok(evaluate(labels, predictions)),
            None => Ok(self.config.metric().compute(labels, predictions)?),
        }
    }

    /// Train a freshly initialised model.
    ///
    /// Without a validation set the training set is used for model selection.
    pub fn fit<S: AsRef<str>>(
        &mut self,
        x_train: &[S],
        y_train: &Targets,
        x_val: Option<&[S]>,
        y_val: Option<&Targets>,
    ) -> Result<&mut Self> {
        self.config.validate()?;
        if x_val.is_some() != y_val.is_some() {
            return Err(Error::InvalidParameter(format!(
                "Both X_val and y_val must be provided for validation. Got X_val={}, y_val={}",
                x_val.is_some(),
                y_val.is_some()
            )));
        }

        let train_graphs = self.featurize(x_train, Some(y_train))?;
        let val_graphs = match (x_val, y_val) {
            (Some(x_val), Some(y_val)) => Some(self.featurize(x_val, Some(y_val))?),
            _ => {
                warn!(
                    "No validation set provided. Using training set for validation. This may lead to overfitting."
                );
                None
            }
        };
        let eval_graphs = val_graphs.as_deref().unwrap_or(&train_graphs);
        let eval_labels = stack_labels(eval_graphs, self.config.num_tasks)?;

        let device = self.device()?;
        let (varmap, model) = Self::build(&self.config, &device)?;
        let vars = varmap.all_vars();
        let training = &self.config.training;
        let mut optimizer = Adam::new(
            vars.clone(),
            ParamsAdam {
                lr: training.learning_rate,
                weight_decay: training.weight_decay,
                ..Default::default()
            },
        )?;
        let higher_better = self.evaluate_higher_better();
        let scheduler = training.use_lr_scheduler.then(|| {
            ReduceLrOnPlateau::new(
                higher_better,
                training.scheduler_factor,
                training.scheduler_patience,
            )
        });
        let fit_config = FitConfig {
            epochs: training.epochs,
            patience: training.patience,
            higher_better,
            verbose: self.config.verbose,
        };
        let criterion = self.config.loss();
        let grad_clip = training.grad_clip_value;
        let batch_size = training.batch_size;
        let mut loader = GraphLoader::new(&train_graphs, batch_size).shuffled(training.seed);

        let outcome = fit_loop(
            &fit_config,
            &varmap,
            &mut optimizer,
            scheduler,
            |optimizer: &mut Adam, _epoch| {
                let mut losses = Vec::with_capacity(loader.len());
                for batch in loader.epoch(&device) {
                    let batch = batch.map_err(candle_core::Error::wrap)?;
                    let (Some(y), Some(mask)) = (&batch.y, &batch.mask) else {
                        candle_core::bail!("training batch has no targets");
                    };
                    let logits = model.forward_t(&batch, true)?;
                    let loss = masked_loss(criterion, &logits, y, mask)?;
                    let mut grads = loss.backward()?;
                    if let Some(max_norm) = grad_clip {
                        clip_grad_norm(&mut grads, &vars, max_norm)?;
                    }
                    optimizer.step(&grads)?;
                    losses.push(loss.to_scalar::<f32>()?);
                }
                Ok(losses.iter().sum::<f32>() / losses.len().max(1) as f32)
            },
            |_epoch| {
                let predictions = predict_graphs(
                    &model,
                    eval_graphs,
                    batch_size,
                    &device,
                    self.config.task_type,
                    self.config.num_tasks,
                )
                .map_err(candle_core::Error::wrap)?;
                self.score(&eval_labels, &predictions)
                    .map_err(candle_core::Error::wrap)
            },
        )?;

        self.model = Some(model);
        self.varmap = Some(varmap);
        self.fitting_loss = outcome.fitting_loss;
        self.fitting_epoch = outcome.fitting_epoch;
        self.best_score = None;
        self.is_fitted = true;
        Ok(self)
    }

    pub fn predict<S: AsRef<str>>(&self, x: &[S]) -> Result<Prediction> {
        let Some(model) = self.model.as_ref().filter(|_| self.is_fitted) else {
            return Err(Error::NotFitted);
        };
        let graphs = self.featurize(x, None)?;
        let prediction = predict_graphs(
            model,
            &graphs,
            self.config.training.batch_size,
            &self.device()?,
            self.config.task_type,
            self.config.num_tasks,
        )?;
        Ok(Prediction { prediction })
    }

    /// Hyperparameter search.
    ///
    /// Each trial samples `search_parameters` (the default search space when
    /// `None`), refits the model and scores it on the validation set, or the
    /// training set without one. The best trial's settings and weights are
    /// restored at the end.
    pub fn autofit<S: AsRef<str>>(
        &mut self,
        x_train: &[S],
        y_train: &Targets,
        x_val: Option<&[S]>,
        y_val: Option<&Targets>,
        search_parameters: Option<SearchSpace>,
        n_trials: usize,
    ) -> Result<&mut Self> {
        let default_space = Self::default_search_space();
        let space = match search_parameters {
            None => default_space,
            Some(space) => {
                let invalid: Vec<&String> = space
                    .keys()
                    .filter(|k| !default_space.contains_key(*k))
                    .collect();
                if !invalid.is_empty() {
                    let valid: Vec<&String> = default_space.keys().collect();
                    return Err(Error::InvalidParameter(format!(
                        "Invalid search parameters: {invalid:?}. Valid parameters are: {valid:?}"
                    )));
                }
                space
            }
        };
        for (name, spec) in &space {
            spec.validate(name)?;
        }

        let higher_better = self.evaluate_higher_better();
        let evaluate_name = self.evaluate_name();
        if self.config.verbose {
            self.log_search_configuration(&space, n_trials);
        }

        let direction = Direction::from_higher_better(higher_better);
        let mut study = Study::new(
            format!("{}_optimization", self.config.model_name),
            direction,
            Box::new(TpeSampler::new(self.config.training.seed)),
        );
        let (eval_x, eval_y) = match (x_val, y_val) {
            (Some(x), Some(y)) => (x, y),
            _ => (x_train, y_train),
        };

        let mut best: Option<BestTrial<A>> = None;
        for _ in 0..n_trials {
            let params = study.ask(&space);
            let outcome = self.run_trial(&params, x_train, y_train, x_val, y_val, eval_x, eval_y);
            let trial = study.tell(params, outcome);
            let Some(score) = trial.value else {
                continue;
            };
            let is_better = best
                .as_ref()
                .map_or(true, |b| direction.is_better(score, b.score));
            if self.config.verbose {
                let best_score = if is_better {
                    score
                } else {
                    best.as_ref().map_or(score, |b| b.score)
                };
                info!(
                    "Trial {}: {evaluate_name} = {score:.4} ({} than best = {best_score:.4})",
                    trial.number,
                    if is_better { "better" } else { "worse" }
                );
                for (name, value) in &trial.params {
                    info!("  {name}: {value}");
                }
            }
            if is_better {
                best = Some(BestTrial {
                    number: trial.number,
                    score,
                    params: trial.params.clone(),
                    config: self.config.clone(),
                    model: self.model.take(),
                    varmap: self.varmap.take(),
                    fitting_loss: std::mem::take(&mut self.fitting_loss),
                    fitting_epoch: self.fitting_epoch,
                });
            }
        }

        let Some(best) = best else {
            return Err(Error::Search(
                "No successful trials completed during optimization".into(),
            ));
        };
        self.config = best.config;
        self.model = best.model;
        self.varmap = best.varmap;
        self.fitting_loss = best.fitting_loss;
        self.fitting_epoch = best.fitting_epoch;
        self.best_score = Some(best.score);
        self.is_fitted = true;

        if self.config.verbose {
            info!("Optimization completed successfully");
            info!("Best {evaluate_name}: {:.4} (trial {})", best.score, best.number);
            info!("Best parameters:");
            for (name, value) in &best.params {
                let kind = space.get(name).map(|s| s.param_type.to_string()).unwrap_or_default();
                info!("  {name}: {value} (type: {kind})");
            }
            info!("Optimization statistics:");
            info!("  Number of trials: {}", study.trials().len());
            info!("  Number of completed trials: {}", study.count(TrialState::Complete));
            info!("  Number of failed trials: {}", study.count(TrialState::Fail));
        }
        Ok(self)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_trial<S: AsRef<str>>(
        &mut self,
        params: &Map<String, Value>,
        x_train: &[S],
        y_train: &Targets,
        x_val: Option<&[S]>,
        y_val: Option<&Targets>,
        eval_x: &[S],
        eval_y: &Targets,
    ) -> Result<f64> {
        self.set_params(params.clone())?;
        self.fit(x_train, y_train, x_val, y_val)?;
        let prediction = self.predict(eval_x)?.prediction;
        let graphs = self.featurize(eval_x, Some(eval_y))?;
        let labels = stack_labels(&graphs, self.config.num_tasks)?;
        Ok(self.score(&labels, &prediction)? as f64)
    }

    fn log_search_configuration(&self, space: &SearchSpace, n_trials: usize) {
        info!("Parameter Search Configuration:");
        info!("Parameters being searched:");
        for (name, spec) in space {
            info!("  • {name}: {}", spec.describe());
        }
        info!("Fixed parameters (not being searched):");
        for (name, value) in self.get_params() {
            if !space.contains_key(&name) {
                info!("  • {name}: {value}");
            }
        }
        info!(
            "Starting hyperparameter optimization using {} metric",
            self.evaluate_name()
        );
        info!(
            "Direction: {}",
            Direction::from_higher_better(self.evaluate_higher_better())
        );
        info!("Number of trials: {n_trials}");
    }
}

/// `[n, num_tasks]` labels of featurized graphs.
fn stack_labels(graphs: &[MolGraph], num_tasks: usize) -> Result<Array2<f32>> {
    let mut labels = Vec::with_capacity(graphs.len() * num_tasks);
    for graph in graphs {
        match &graph.y {
            Some(y) if y.len() == num_tasks => labels.extend(y.iter().copied()),
            _ => {
                return Err(Error::InvalidParameter(
                    "every evaluation molecule needs a target row".into(),
                ))
            }
        }
    }
    Array2::from_shape_vec((graphs.len(), num_tasks), labels)
        .map_err(|e| Error::InvalidParameter(e.to_string()))
}

/// Inference over `graphs` in input order.
fn predict_graphs<A: Architecture>(
    model: &A,
    graphs: &[MolGraph],
    batch_size: usize,
    device: &Device,
    task_type: TaskType,
    num_tasks: usize,
) -> Result<Array2<f32>> {
    let mut loader = GraphLoader::new(graphs, batch_size);
    let mut values = Vec::with_capacity(graphs.len() * num_tasks);
    for batch in loader.epoch(device) {
        let batch = batch?;
        let mut out: Tensor = model.predict(&batch)?;
        if task_type == TaskType::Classification {
            out = candle_nn::ops::sigmoid(&out)?;
        }
        let rows = out.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        values.extend(rows.into_iter().flatten());
    }
    Array2::from_shape_vec((graphs.len(), num_tasks), values)
        .map_err(|e| Error::InvalidParameter(e.to_string()))
}

impl<A: Architecture> MolecularEstimator for GraphPredictor<A> {
    fn get_params(&self) -> Map<String, Value> {
        config_params(&self.config)
    }

    fn set_params(&mut self, params: Map<String, Value>) -> Result<()> {
        let config = merge_params(&self.config, params)?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn variables(&self) -> Option<&VarMap> {
        self.varmap.as_ref()
    }

    fn restore(&mut self, params: Map<String, Value>, checkpoint: &Checkpoint) -> Result<()> {
        let mut config = merge_params(&self.config, params)?;
        config.validate()?;
        config.model_name = checkpoint.model_name.clone();
        let device = crate::device(config.device.as_deref())?;
        let (varmap, model) = Self::build(&config, &device)?;
        load_weights(&varmap, &checkpoint.tensors)?;

        self.config = config;
        self.varmap = Some(varmap);
        self.model = Some(model);
        self.best_score = None;
        self.is_fitted = true;
        Ok(())
    }
}

impl<A: Architecture> fmt::Debug for GraphPredictor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GnnParams;
    use serde_json::json;

    #[test]
    fn test_config_flattens_into_one_namespace() {
        let config = PredictorConfig::<GnnParams>::default();
        let params = config_params(&config);
        for key in [
            "num_tasks",
            "emb_dim",
            "gnn_type",
            "batch_size",
            "learning_rate",
            "model_name",
        ] {
            assert!(params.contains_key(key), "missing {key}");
        }
        assert_eq!(params["task_type"], json!("classification"));

        let parsed: PredictorConfig<GnnParams> =
            serde_json::from_value(json!({"num_tasks": 2, "emb_dim": 64, "epochs": 3})).unwrap();
        assert_eq!(parsed.num_tasks, 2);
        assert_eq!(parsed.arch.emb_dim, 64);
        assert_eq!(parsed.arch.num_layer, 5);
        assert_eq!(parsed.training.epochs, 3);
        assert_eq!(parsed.training.batch_size, 128);
    }

    #[test]
    fn test_defaults_follow_task_type() {
        let predictor = GnnMolecularPredictor::new(Default::default()).unwrap();
        assert_eq!(predictor.model_name(), "GNNMolecularPredictor");
        assert_eq!(predictor.config().loss(), LossCriterion::BceWithLogits);
        assert!(predictor.evaluate_higher_better());
        assert_eq!(predictor.evaluate_name(), "roc_auc");

        let regression = RpgnnMolecularPredictor::new(PredictorConfig {
            task_type: TaskType::Regression,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(regression.model_name(), "RPGNNMolecularPredictor");
        assert_eq!(regression.config().loss(), LossCriterion::L1);
        assert!(!regression.evaluate_higher_better());

        let custom = regression.with_evaluate_fn("max_error", |_, _| 0.0, false);
        assert_eq!(custom.evaluate_name(), "max_error");
    }

    #[test]
    fn test_set_params() {
        let mut predictor = GnnMolecularPredictor::new(Default::default()).unwrap();
        let mut params = Map::new();
        params.insert("gnn_type".into(), json!("gcn"));
        params.insert("epochs".into(), json!(2));
        predictor.set_params(params).unwrap();
        assert_eq!(predictor.config().arch.gnn_type, crate::nn::GnnType::Gcn);
        assert_eq!(predictor.config().training.epochs, 2);

        let mut bad = Map::new();
        bad.insert("drop_ratio".into(), json!(2.0));
        assert!(predictor.set_params(bad).is_err());
        assert_eq!(predictor.config().arch.drop_ratio, 0.5);

        let mut unknown = Map::new();
        unknown.insert("hidden_size".into(), json!(2));
        assert!(matches!(
            predictor.set_params(unknown),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_predict_requires_fit() {
        let predictor = GnnMolecularPredictor::new(Default::default()).unwrap();
        assert!(matches!(predictor.predict(&["CCO"]), Err(Error::NotFitted)));
        assert!(predictor.describe().contains("is_fitted=false"));
    }
}
