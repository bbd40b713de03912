//! Self-supervised molecular encoders.
use super::checkpoint::{load_weights, Checkpoint};
use super::{config_params, merge_params, JsonConfig, MolecularEstimator, TrainingConfig};
use crate::error::{Error, Result};
use crate::models::{EdgePred, EdgePredParams};
use crate::training::{clip_grad_norm, fit_loop, Adam, FitConfig, ParamsAdam, ReduceLrOnPlateau};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use molgraph_core::{validate_inputs, GraphFeatures, GraphLoader, MolGraph};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::Cell;
use std::fmt;
use tracing::warn;

fn default_model_name() -> String {
    EdgePred::MODEL_NAME.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(flatten)]
    pub arch: EdgePredParams,
    #[serde(flatten)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            arch: EdgePredParams::default(),
            training: TrainingConfig::default(),
            device: None,
            verbose: false,
            model_name: default_model_name(),
        }
    }
}

impl JsonConfig for EncoderConfig {}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        validator::Validate::validate(&self.arch)?;
        validator::Validate::validate(&self.training)?;
        Ok(())
    }
}

/// Learns molecule embeddings by predicting which atom pairs are bonded.
pub struct EdgePredMolecularEncoder {
    config: EncoderConfig,
    model: Option<EdgePred>,
    varmap: Option<VarMap>,
    fitting_loss: Vec<f32>,
    fitting_epoch: usize,
    is_fitted: bool,
}

impl Default for EdgePredMolecularEncoder {
    fn default() -> Self {
        Self {
            config: EncoderConfig::default(),
            model: None,
            varmap: None,
            fitting_loss: Vec::new(),
            fitting_epoch: 0,
            is_fitted: false,
        }
    }
}

impl EdgePredMolecularEncoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn fitting_loss(&self) -> &[f32] {
        &self.fitting_loss
    }

    pub fn fitting_epoch(&self) -> usize {
        self.fitting_epoch
    }

    fn device(&self) -> Result<Device> {
        crate::device(self.config.device.as_deref())
    }

    fn build(config: &EncoderConfig, device: &Device) -> Result<(VarMap, EdgePred)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = EdgePred::load(vb, &config.arch)?;
        Ok((varmap, model))
    }

    fn featurize<S: AsRef<str>>(&self, x: &[S]) -> Result<Vec<MolGraph>> {
        let (molecules, _) = validate_inputs(x, None, 1)?;
        Ok(molecules.iter().map(|mol| mol.to_graph()).collect())
    }

    /// Self-supervised training; the mean edge prediction loss of each epoch
    /// drives both model selection and the learning rate schedule.
    pub fn fit<S: AsRef<str>>(&mut self, x: &[S]) -> Result<&mut Self> {
        self.config.validate()?;
        let graphs = self.featurize(x)?;
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
        let scheduler = training.use_lr_scheduler.then(|| {
            ReduceLrOnPlateau::new(false, training.scheduler_factor, training.scheduler_patience)
        });
        let fit_config = FitConfig {
            epochs: training.epochs,
            patience: training.patience,
            higher_better: false,
            verbose: self.config.verbose,
        };
        let grad_clip = training.grad_clip_value;
        let mut rng = StdRng::seed_from_u64(training.seed);
        let mut loader = GraphLoader::new(&graphs, training.batch_size).shuffled(training.seed);
        let epoch_loss = Cell::new(f32::NAN);

        let outcome = fit_loop(
            &fit_config,
            &varmap,
            &mut optimizer,
            scheduler,
            |optimizer: &mut Adam, epoch| {
                let mut losses = Vec::with_capacity(loader.len());
                for batch in loader.epoch(&device) {
                    let batch = batch.map_err(candle_core::Error::wrap)?;
                    let Some(loss) = model.loss(&batch, &mut rng, true)? else {
                        continue;
                    };
                    let mut grads = loss.backward()?;
                    if let Some(max_norm) = grad_clip {
                        clip_grad_norm(&mut grads, &vars, max_norm)?;
                    }
                    optimizer.step(&grads)?;
                    losses.push(loss.to_scalar::<f32>()?);
                }
                let mean = if losses.is_empty() {
                    warn!("Epoch {epoch}: no batch contained a bond to predict");
                    f32::NAN
                } else {
                    losses.iter().sum::<f32>() / losses.len() as f32
                };
                epoch_loss.set(mean);
                Ok(mean)
            },
            |_epoch| Ok(epoch_loss.get()),
        )?;

        self.model = Some(model);
        self.varmap = Some(varmap);
        self.fitting_loss = outcome.fitting_loss;
        self.fitting_epoch = outcome.fitting_epoch;
        self.is_fitted = true;
        Ok(self)
    }

    /// `[n, hidden_size]` embeddings in input order.
    pub fn encode<S: AsRef<str>>(&self, x: &[S]) -> Result<Tensor> {
        let Some(model) = self.model.as_ref().filter(|_| self.is_fitted) else {
            return Err(Error::NotFitted);
        };
        let graphs = self.featurize(x)?;
        let device = self.device()?;
        let mut loader = GraphLoader::new(&graphs, self.config.training.batch_size);
        let mut embeddings = Vec::with_capacity(loader.len());
        for batch in loader.epoch(&device) {
            embeddings.push(model.embed(&batch?)?);
        }
        if embeddings.is_empty() {
            return Ok(Tensor::zeros(
                (0, self.config.arch.hidden_size),
                DType::F32,
                &device,
            )?);
        }
        Ok(Tensor::cat(&embeddings, 0)?)
    }

    pub fn encode_array<S: AsRef<str>>(&self, x: &[S]) -> Result<Array2<f32>> {
        let embeddings = self.encode(x)?;
        let (rows, cols) = embeddings.dims2()?;
        let values = embeddings.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| Error::InvalidParameter(e.to_string()))
    }
}

impl MolecularEstimator for EdgePredMolecularEncoder {
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
        self.is_fitted = true;
        Ok(())
    }
}

impl fmt::Debug for EdgePredMolecularEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encoder_params() {
        let mut encoder = EdgePredMolecularEncoder::default();
        assert_eq!(encoder.model_name(), "EdgePredMolecularEncoder");
        let params = encoder.get_params();
        assert_eq!(params["hidden_size"], json!(300));
        assert_eq!(params["num_layer"], json!(5));

        let mut update = Map::new();
        update.insert("hidden_size".into(), json!(0));
        assert!(encoder.set_params(update).is_err());
        assert!(matches!(encoder.encode(&["CCO"]), Err(Error::NotFitted)));
    }
}
