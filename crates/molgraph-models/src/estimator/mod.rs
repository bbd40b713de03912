//! Scikit-learn style estimators wrapping the architectures in [`crate::models`].
//!
//! Every estimator keeps its settings in one serde struct whose fields form a
//! flat parameter namespace. [`MolecularEstimator::get_params`] and
//! [`MolecularEstimator::set_params`] work on that namespace, and the same
//! JSON object is stored in checkpoint metadata so that a saved model can be
//! rebuilt with the hyperparameters it was trained with.
pub mod checkpoint;
pub mod encoder;
pub mod predictor;

use crate::error::{Error, Result};
use candle_nn::VarMap;
use checkpoint::Checkpoint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Maximum length of [`MolecularEstimator::describe`].
const DESCRIBE_MAX_CHARS: usize = 700;

/// Parameters describing where and how loudly an estimator runs. They are
/// saved with a checkpoint but never applied when one is loaded.
const RUNTIME_PARAMS: [&str; 2] = ["device", "verbose"];

/// Optimisation settings shared by every estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TrainingConfig {
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1))]
    pub epochs: usize,
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f64,
    #[validate(range(min = 0.0))]
    pub weight_decay: f64,
    /// Early stopping patience in epochs.
    pub patience: usize,
    /// Global gradient norm limit.
    #[validate(range(exclusive_min = 0.0))]
    pub grad_clip_value: Option<f64>,
    pub use_lr_scheduler: bool,
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub scheduler_factor: f64,
    pub scheduler_patience: usize,
    /// Seeds batch shuffling, hyperparameter sampling and negative sampling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            epochs: 500,
            learning_rate: 0.001,
            weight_decay: 0.0,
            patience: 50,
            grad_clip_value: None,
            use_lr_scheduler: true,
            scheduler_factor: 0.5,
            scheduler_patience: 5,
            seed: 42,
        }
    }
}

/// JSON persistence for configuration structs; also the `config.json` format
/// published next to hub checkpoints.
pub trait JsonConfig: Serialize + DeserializeOwned {
    fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

impl JsonConfig for TrainingConfig {}

/// One hyperparameter compared while loading a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterStatus {
    pub parameter: String,
    pub old_value: Value,
    pub new_value: Value,
    pub changed: bool,
}

/// Outcome of loading a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    pub model_name: String,
    /// Changed parameters first, then alphabetical.
    pub parameters: Vec<ParameterStatus>,
}

impl LoadSummary {
    /// Compare checkpoint hyperparameters with the estimator's current ones.
    /// Keys the estimator does not know are ignored.
    pub fn compare(
        model_name: &str,
        current: &Map<String, Value>,
        checkpoint: &Map<String, Value>,
    ) -> Self {
        let mut parameters: Vec<ParameterStatus> = checkpoint
            .iter()
            .filter_map(|(key, new_value)| {
                current.get(key).map(|old_value| ParameterStatus {
                    parameter: key.clone(),
                    old_value: old_value.clone(),
                    new_value: new_value.clone(),
                    changed: old_value != new_value,
                })
            })
            .collect();
        parameters.sort_by(|a, b| {
            b.changed
                .cmp(&a.changed)
                .then_with(|| a.parameter.cmp(&b.parameter))
        });
        Self {
            model_name: model_name.to_string(),
            parameters,
        }
    }

    pub fn num_changed(&self) -> usize {
        self.parameters.iter().filter(|p| p.changed).count()
    }

    pub fn num_unchanged(&self) -> usize {
        self.parameters.len() - self.num_changed()
    }

    /// Fixed-width Parameter / Old Value / New Value / Status table.
    pub fn table(&self) -> String {
        let rule = "-".repeat(80);
        let mut lines = vec![
            rule.clone(),
            format!(
                "{:<20} {:<20} {:<20} {:<10}",
                "Parameter", "Old Value", "New Value", "Status"
            ),
            rule.clone(),
        ];
        for p in &self.parameters {
            lines.push(format!(
                "{:<20} {:<20} {:<20} {:<10}",
                p.parameter,
                p.old_value.to_string(),
                p.new_value.to_string(),
                if p.changed { "Changed" } else { "Unchanged" }
            ));
        }
        lines.push(rule);
        lines.join("\n")
    }

    fn log(&self) {
        if self.parameters.is_empty() {
            return;
        }
        info!("Hyperparameter Status:\n{}", self.table());
        info!(
            "Summary: {} parameters changed, {} unchanged",
            self.num_changed(),
            self.num_unchanged()
        );
    }
}

/// Common interface of predictors and encoders.
pub trait MolecularEstimator {
    /// Flat map of every configurable parameter.
    fn get_params(&self) -> Map<String, Value>;

    /// Update parameters by name. Unknown names and values of the wrong type
    /// are rejected and the resulting configuration is re-validated; on error
    /// the estimator is left unchanged.
    fn set_params(&mut self, params: Map<String, Value>) -> Result<()>;

    fn is_fitted(&self) -> bool;

    fn model_name(&self) -> &str;

    /// Trained variables, `None` until the estimator is fitted or loaded.
    fn variables(&self) -> Option<&VarMap>;

    /// Rebuild the model from the current parameters with `params` applied and
    /// copy the checkpoint weights into it. The parameters, model and fitted
    /// state are only replaced once the weights have loaded; on error the
    /// estimator is left unchanged.
    fn restore(&mut self, params: Map<String, Value>, checkpoint: &Checkpoint) -> Result<()>;

    fn describe(&self) -> String {
        describe_params(self.model_name(), self.is_fitted(), &self.get_params())
    }

    /// Write the weights and hyperparameters to a `.safetensors` file.
    fn save_to_local<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        match self.variables() {
            Some(varmap) if self.is_fitted() => {
                checkpoint::save(path.as_ref(), varmap, &self.get_params())
            }
            _ => Err(Error::NotFitted),
        }
    }

    fn load_from_local<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadSummary> {
        self.load(path, None)
    }

    /// Load `path`, downloading `<stem>.safetensors` from `repo_id` on the
    /// model hub if the file does not exist locally.
    fn load_from_hub<P: AsRef<Path>>(&mut self, path: P, repo_id: &str) -> Result<LoadSummary> {
        self.load(path, Some(repo_id))
    }

    fn load<P: AsRef<Path>>(&mut self, path: P, repo_id: Option<&str>) -> Result<LoadSummary> {
        let file = checkpoint::resolve(path.as_ref(), repo_id)?;
        let checkpoint = Checkpoint::read(&file)?;

        let current = self.get_params();
        let summary = LoadSummary::compare(
            &checkpoint.model_name,
            &current,
            &checkpoint.hyperparameters,
        );
        summary.log();

        let updates: Map<String, Value> = checkpoint
            .hyperparameters
            .iter()
            .filter(|(key, _)| {
                current.contains_key(*key) && !RUNTIME_PARAMS.contains(&key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.restore(updates, &checkpoint)?;
        info!(
            "Model successfully loaded from {}",
            if repo_id.is_some() {
                "repository"
            } else {
                "local path"
            }
        );
        Ok(summary)
    }
}

/// Apply `updates` to a serializable config by round-tripping it through a
/// JSON object.
pub(crate) fn merge_params<C>(config: &C, updates: Map<String, Value>) -> Result<C>
where
    C: Serialize + DeserializeOwned,
{
    let Value::Object(mut params) = serde_json::to_value(config)? else {
        return Err(Error::InvalidParameter(
            "configuration does not serialize to an object".into(),
        ));
    };
    for (key, value) in updates {
        if !params.contains_key(&key) {
            let valid = params.keys().cloned().collect::<Vec<_>>().join(", ");
            return Err(Error::InvalidParameter(format!(
                "Invalid parameter `{key}`. Valid parameters are: {valid}"
            )));
        }
        params.insert(key, value);
    }
    serde_json::from_value(Value::Object(params))
        .map_err(|e| Error::InvalidParameter(e.to_string()))
}

pub(crate) fn config_params<C: Serialize>(config: &C) -> Map<String, Value> {
    match serde_json::to_value(config) {
        Ok(Value::Object(params)) => params,
        _ => Map::new(),
    }
}

fn format_float(v: f64) -> String {
    if v == 0.0 || (v.fract() == 0.0 && v.abs() < 1e6) {
        format!("{v:.1}")
    } else if v.abs() < 1e-3 || v.abs() >= 1e4 {
        format!("{v:.2e}")
    } else {
        let s = format!("{v:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Number(n) if n.is_f64() => n.as_f64().map(format_float).unwrap_or_default(),
        Value::String(s) if s.chars().count() > 50 => {
            let chars: Vec<char> = s.chars().collect();
            let head: String = chars[..25].iter().collect();
            let tail: String = chars[chars.len() - 22..].iter().collect();
            format!("\"{head}...{tail}\"")
        }
        Value::Array(items) if items.len() > 6 => {
            let head: Vec<String> = items[..3].iter().map(format_value).collect();
            let tail: Vec<String> = items[items.len() - 3..].iter().map(format_value).collect();
            format!("[{}, ..., {}]", head.join(", "), tail.join(", "))
        }
        Value::Object(map) if map.len() > 6 => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k:?}: {}", format_value(v)))
                .collect();
            format!(
                "{{{}}}...{{{}}}",
                entries[..3].join(", "),
                entries[entries.len() - 3..].join(", ")
            )
        }
        other => other.to_string(),
    }
}

/// `Name(\n    model_name=..., is_fitted=..., <sorted params>\n)`, cut to
/// [`DESCRIBE_MAX_CHARS`].
pub(crate) fn describe_params(
    model_name: &str,
    is_fitted: bool,
    params: &Map<String, Value>,
) -> String {
    let mut attributes = vec![
        format!("model_name={model_name:?}"),
        format!("is_fitted={is_fitted}"),
    ];
    let mut sorted: Vec<(&String, &Value)> =
        params.iter().filter(|(k, _)| k.as_str() != "model_name").collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    attributes.extend(sorted.into_iter().map(|(k, v)| format!("{k}={}", format_value(v))));

    let header = format!("{model_name}(");
    let repr = format!("{header}\n    {}\n)", attributes.join(",\n    "));
    if repr.len() <= DESCRIBE_MAX_CHARS {
        return repr;
    }
    let mut lines = vec![header.clone()];
    let mut length = header.len();
    for attribute in &attributes {
        let line = format!("    {attribute},");
        // leave room for the ellipsis and the closing line
        if length + line.len() + 11 > DESCRIBE_MAX_CHARS {
            lines.push("    ...".to_string());
            break;
        }
        length += line.len() + 1;
        lines.push(line);
    }
    lines.push(")".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_training_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        let config = TrainingConfig {
            scheduler_factor: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = TrainingConfig {
            grad_clip_value: Some(0.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_params() {
        let config = TrainingConfig::default();
        let mut updates = Map::new();
        updates.insert("epochs".into(), json!(3));
        updates.insert("grad_clip_value".into(), json!(1.5));
        let merged = merge_params(&config, updates).unwrap();
        assert_eq!(merged.epochs, 3);
        assert_eq!(merged.grad_clip_value, Some(1.5));

        let mut unknown = Map::new();
        unknown.insert("epoch".into(), json!(3));
        let err = merge_params(&config, unknown).unwrap_err().to_string();
        assert!(err.contains("Invalid parameter `epoch`"));
        assert!(err.contains("epochs"));

        let mut wrong_type = Map::new();
        wrong_type.insert("batch_size".into(), json!("large"));
        assert!(merge_params(&config, wrong_type).is_err());
    }

    #[test]
    fn test_load_summary_orders_changes_first() {
        let current = config_params(&TrainingConfig::default());
        let mut saved = current.clone();
        saved.insert("epochs".into(), json!(10));
        saved.insert("unknown".into(), json!(1));
        let summary = LoadSummary::compare("model", &current, &saved);
        assert_eq!(summary.parameters[0].parameter, "epochs");
        assert!(summary.parameters[0].changed);
        assert_eq!(summary.num_changed(), 1);
        assert_eq!(summary.num_unchanged(), current.len() - 1);
        assert!(summary.table().contains("Changed"));
    }

    #[test]
    fn test_describe() {
        let mut params = config_params(&TrainingConfig::default());
        params.insert("fitting_loss".into(), json!([1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4]));
        let repr = describe_params("Demo", false, &params);
        assert!(repr.starts_with("Demo(\n    model_name=\"Demo\",\n    is_fitted=false"));
        assert!(repr.contains("learning_rate=0.001"));
        assert!(repr.contains("fitting_loss=[1.0, 0.9, 0.8, ..., 0.6, 0.5, 0.4]"));
        assert!(repr.ends_with(')'));

        for i in 0..60 {
            params.insert(format!("extra_{i:02}"), json!(i));
        }
        let repr = describe_params("Demo", true, &params);
        assert!(repr.len() <= DESCRIBE_MAX_CHARS);
        assert!(repr.contains("    ..."));
    }
}
