//! Fixture molecules and small datasets shared by the molgraph test suites.
use serde::Deserialize;
use std::fs;
use tempfile::{Builder, NamedTempFile};

#[derive(Debug)]
pub struct TestFile {
    filebinary: &'static [u8],
    suffix: &'static str,
}

impl TestFile {
    /// Tab separated `smiles<TAB>name` lines; the last entry is not valid SMILES.
    pub fn molecules_smi() -> Self {
        Self {
            filebinary: include_bytes!("../data/molecules/molecules.smi"),
            suffix: "smi",
        }
    }

    pub fn classification_json() -> Self {
        Self {
            filebinary: include_bytes!("../data/molecules/classification.json"),
            suffix: "json",
        }
    }

    pub fn regression_json() -> Self {
        Self {
            filebinary: include_bytes!("../data/molecules/regression.json"),
            suffix: "json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        std::str::from_utf8(self.filebinary).unwrap_or_default()
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }
}

/// SMILES with per-task targets; `null` targets are missing labels.
#[derive(Debug, Clone, Deserialize)]
pub struct MoleculeDataset {
    pub name: String,
    pub tasks: Vec<String>,
    pub smiles: Vec<String>,
    targets: Vec<Vec<Option<f32>>>,
}

impl MoleculeDataset {
    pub fn from_test_file(file: &TestFile) -> serde_json::Result<Self> {
        serde_json::from_slice(file.filebinary)
    }

    /// Binary labels for two tasks, with a few missing values.
    pub fn classification() -> serde_json::Result<Self> {
        Self::from_test_file(&TestFile::classification_json())
    }

    /// One continuous task.
    pub fn regression() -> serde_json::Result<Self> {
        Self::from_test_file(&TestFile::regression_json())
    }

    pub fn len(&self) -> usize {
        self.smiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.smiles.is_empty()
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Targets as rows, missing labels as NaN.
    pub fn targets(&self) -> Vec<Vec<f32>> {
        self.targets
            .iter()
            .map(|row| row.iter().map(|v| v.unwrap_or(f32::NAN)).collect())
            .collect()
    }

    /// Targets of a single task.
    pub fn task(&self, idx: usize) -> Vec<f32> {
        self.targets()
            .into_iter()
            .map(|row| row.get(idx).copied().unwrap_or(f32::NAN))
            .collect()
    }

    /// Split at `n`: the first `n` molecules and the rest.
    pub fn split_at(&self, n: usize) -> (Self, Self) {
        let n = n.min(self.len());
        let head = Self {
            smiles: self.smiles[..n].to_vec(),
            targets: self.targets[..n].to_vec(),
            ..self.clone()
        };
        let tail = Self {
            smiles: self.smiles[n..].to_vec(),
            targets: self.targets[n..].to_vec(),
            ..self.clone()
        };
        (head, tail)
    }
}
