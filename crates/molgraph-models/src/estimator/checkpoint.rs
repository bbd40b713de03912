//! `.safetensors` checkpoints with hyperparameter metadata.
//!
//! Weights are stored under their variable names. The header metadata holds
//! `hyperparameters` (the JSON object returned by `get_params`),
//! `model_name` (the file stem), `date_saved` and `version`.
use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use safetensors::SafeTensors;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CHECKPOINT_EXTENSION: &str = "safetensors";
const REQUIRED_KEYS: [&str; 2] = ["hyperparameters", "model_name"];

/// Decoded checkpoint file.
#[derive(Debug)]
pub struct Checkpoint {
    pub hyperparameters: Map<String, Value>,
    pub model_name: String,
    pub date_saved: Option<String>,
    pub version: Option<String>,
    /// Weights on the CPU, keyed by variable name.
    pub tensors: HashMap<String, Tensor>,
}

impl Checkpoint {
    pub fn read(path: &Path) -> Result<Self> {
        let buffer = fs::read(path)?;
        let (_, header) = SafeTensors::read_metadata(&buffer)?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !metadata.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Checkpoint(format!(
                "checkpoint missing required keys: {}",
                missing.join(", ")
            )));
        }

        let hyperparameters = match serde_json::from_str(&metadata["hyperparameters"])? {
            Value::Object(params) => params,
            other => {
                return Err(Error::Checkpoint(format!(
                    "hyperparameters must be a JSON object, found {other}"
                )))
            }
        };
        let tensors = candle_core::safetensors::load_buffer(&buffer, &Device::Cpu)?;
        Ok(Self {
            hyperparameters,
            model_name: metadata["model_name"].clone(),
            date_saved: metadata.get("date_saved").cloned(),
            version: metadata.get("version").cloned(),
            tensors,
        })
    }
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Checkpoint(format!("no file name in {}", path.display())))
}

fn check_extension(path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(CHECKPOINT_EXTENSION) => Ok(()),
        _ => Err(Error::Checkpoint(format!(
            "save path should end with `.{CHECKPOINT_EXTENSION}`: {}",
            path.display()
        ))),
    }
}

/// Write every variable of `varmap` plus metadata to `path`.
pub fn save(path: &Path, varmap: &VarMap, hyperparameters: &Map<String, Value>) -> Result<()> {
    check_extension(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let metadata: HashMap<String, String> = [
        (
            "hyperparameters".to_string(),
            serde_json::to_string(hyperparameters)?,
        ),
        ("model_name".to_string(), file_stem(path)?),
        ("date_saved".to_string(), chrono::Local::now().to_rfc3339()),
        (
            "version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
    ]
    .into_iter()
    .collect();

    let tensors: Vec<(String, Tensor)> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| Error::Checkpoint("variable map lock poisoned".into()))?;
        let mut tensors: Vec<_> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        tensors.sort_by(|a, b| a.0.cmp(&b.0));
        tensors
    };
    safetensors::serialize_to_file(tensors, &Some(metadata), path)?;
    info!("Model saved to {}", path.display());
    Ok(())
}

/// Copy checkpoint weights into `varmap`. Every variable must be present with
/// the same shape; extra tensors in the checkpoint are an error too.
pub fn load_weights(varmap: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Checkpoint("variable map lock poisoned".into()))?;
    for (name, var) in data.iter() {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| Error::Checkpoint(format!("missing weight `{name}`")))?;
        if tensor.shape() != var.shape() {
            return Err(Error::Checkpoint(format!(
                "shape mismatch for `{name}`: checkpoint {:?}, model {:?}",
                tensor.dims(),
                var.dims()
            )));
        }
        var.set(&tensor.to_device(var.device())?.to_dtype(var.dtype())?)?;
    }
    let unexpected: Vec<&String> = tensors.keys().filter(|k| !data.contains_key(*k)).collect();
    if !unexpected.is_empty() {
        return Err(Error::Checkpoint(format!(
            "unexpected weights in checkpoint: {unexpected:?}"
        )));
    }
    Ok(())
}

/// Local file if it exists, otherwise a download from `repo_id`.
pub fn resolve(path: &Path, repo_id: Option<&str>) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    match repo_id {
        Some(repo_id) => download(path, repo_id),
        None => Err(Error::ModelNotFound(path.to_path_buf())),
    }
}

/// Fetch `<stem>.safetensors` and, when published, `config.json` into the
/// directory of `path`.
fn download(path: &Path, repo_id: &str) -> Result<PathBuf> {
    let filename = format!("{}.{CHECKPOINT_EXTENSION}", file_stem(path)?);
    let failed = |reason: String| Error::Download {
        repo: repo_id.to_string(),
        file: filename.clone(),
        reason,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let target = dir.join(&filename);

    let api = Api::new().map_err(|e| failed(e.to_string()))?;
    let repo = api.repo(Repo::with_revision(
        repo_id.to_string(),
        RepoType::Model,
        "main".to_string(),
    ));
    info!("Downloading {filename} from {repo_id}");
    let fetched = repo
        .get(&filename)
        .map_err(|e| failed(e.to_string()))
        .and_then(|cached| fs::copy(&cached, &target).map_err(|e| failed(e.to_string())));
    if let Err(e) = fetched {
        if target.exists() {
            if let Err(cleanup) = fs::remove_file(&target) {
                warn!("Could not remove partial download {}: {cleanup}", target.display());
            }
        }
        return Err(e);
    }

    match repo.get("config.json") {
        Ok(cached) => {
            fs::copy(cached, dir.join("config.json"))?;
        }
        Err(e) => debug!("No config.json in {repo_id}: {e}"),
    }
    Ok(target)
}
