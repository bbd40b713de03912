//! Input checks shared by every estimator.
use crate::error::{MolError, Result};
use crate::smiles::Molecule;
use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};
use tracing::warn;

/// Target values passed to `fit`: a single column or a `[n, num_tasks]` matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    Single(Array1<f32>),
    Multi(Array2<f32>),
}

impl From<Array1<f32>> for Targets {
    fn from(y: Array1<f32>) -> Self {
        Targets::Single(y)
    }
}

impl From<Array2<f32>> for Targets {
    fn from(y: Array2<f32>) -> Self {
        Targets::Multi(y)
    }
}

impl From<Vec<f32>> for Targets {
    fn from(y: Vec<f32>) -> Self {
        Targets::Single(Array1::from(y))
    }
}

impl From<Vec<Vec<f32>>> for Targets {
    fn from(rows: Vec<Vec<f32>>) -> Self {
        let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
        let nrows = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        match Array2::from_shape_vec((nrows, ncols), flat.clone()) {
            Ok(y) => Targets::Multi(y),
            // ragged rows: keep them flat so the shape check reports the mismatch
            Err(_) => Targets::Single(Array1::from(flat)),
        }
    }
}

impl Targets {
    pub fn nrows(&self) -> usize {
        match self {
            Targets::Single(y) => y.len(),
            Targets::Multi(y) => y.nrows(),
        }
    }
}

/// Parse one SMILES string, producing the user-facing message on failure.
pub fn validate_smiles(smiles: &str, idx: usize) -> std::result::Result<Molecule, String> {
    if smiles.trim().is_empty() {
        return Err(format!("Empty SMILES at index {idx}"));
    }
    Molecule::from_smiles(smiles)
        .map_err(|e| format!("Invalid SMILES structure at index {idx}: {smiles} ({e})"))
}

/// Validate SMILES inputs and optional targets.
///
/// Every SMILES is parsed and all failures are reported together. Targets are
/// reshaped to `[n, num_tasks]`, infinite values become NaN, and missing
/// labels are counted per task and reported as a warning.
pub fn validate_inputs<S: AsRef<str>>(
    smiles: &[S],
    y: Option<&Targets>,
    num_tasks: usize,
) -> Result<(Vec<Molecule>, Option<Array2<f32>>)> {
    let mut molecules = Vec::with_capacity(smiles.len());
    let mut errors = Vec::new();
    for (idx, s) in smiles.iter().enumerate() {
        match validate_smiles(s.as_ref(), idx) {
            Ok(mol) => molecules.push(mol),
            Err(msg) => errors.push(msg),
        }
    }
    if !errors.is_empty() {
        return Err(MolError::InvalidSmiles(errors));
    }

    let Some(y) = y else {
        return Ok((molecules, None));
    };

    let mut y = match y {
        Targets::Single(col) => {
            if num_tasks != 1 {
                return Err(MolError::Targets(format!(
                    "1D target array provided but num_tasks is {num_tasks}"
                )));
            }
            col.clone().insert_axis(Axis(1))
        }
        Targets::Multi(matrix) => matrix.clone(),
    };

    if y.nrows() != smiles.len() {
        return Err(MolError::Targets(format!(
            "Number of targets ({}) does not match number of SMILES strings ({})",
            y.nrows(),
            smiles.len()
        )));
    }
    if y.ncols() != num_tasks {
        return Err(MolError::Targets(format!(
            "Number of target columns ({}) does not match num_tasks ({num_tasks})",
            y.ncols()
        )));
    }

    let num_inf = y.iter().filter(|v| v.is_infinite()).count();
    if num_inf > 0 {
        warn!("Found {num_inf} infinite values in targets; converting them to NaN");
        y.mapv_inplace(|v| if v.is_infinite() { f32::NAN } else { v });
    }

    let nan_per_task: Vec<usize> = y
        .columns()
        .into_iter()
        .map(|col| col.iter().filter(|v| v.is_nan()).count())
        .collect();
    if nan_per_task.iter().any(|&n| n > 0) {
        let report = nan_per_task
            .iter()
            .enumerate()
            .filter(|(_, &n)| n > 0)
            .map(|(task, n)| format!("task {task}: {n}"))
            .join(", ");
        warn!("Missing labels (NaN) found and will be masked during training: {report}");
    }

    Ok((molecules, Some(y)))
}

/// For each column, whether every non-NaN value is 0 or 1.
pub fn inspect_task_types(y: &Array2<f32>) -> Vec<bool> {
    y.columns()
        .into_iter()
        .map(|col| {
            col.iter()
                .filter(|v| !v.is_nan())
                .all(|&v| v == 0.0 || v == 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_validate_smiles_messages() {
        assert_eq!(validate_smiles("  ", 3).unwrap_err(), "Empty SMILES at index 3");
        let msg = validate_smiles("C(C", 1).unwrap_err();
        assert!(msg.starts_with("Invalid SMILES structure at index 1: C(C ("));
        assert!(validate_smiles("CCO", 0).is_ok());
        let msg = validate_smiles("[C+100+100]", 2).unwrap_err();
        assert!(msg.contains("charge out of range"));
        let msg = validate_smiles("C[CH255]", 4).unwrap_err();
        assert!(msg.starts_with("Invalid SMILES structure at index 4"));
    }

    #[test]
    fn test_collects_all_failures() {
        let err = validate_inputs(&["CCO", "C1CC", "", "Q"], None, 1).unwrap_err();
        match err {
            MolError::InvalidSmiles(lines) => assert_eq!(lines.len(), 3),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_target_shapes() {
        let smiles = ["CCO", "CCN"];
        let single = Targets::from(array![1.0f32, 0.0]);
        let (_, y) = validate_inputs(&smiles, Some(&single), 1).unwrap();
        assert_eq!(y.unwrap().shape(), &[2, 1]);

        assert!(validate_inputs(&smiles, Some(&single), 2).is_err());

        let wrong_rows = Targets::from(array![[1.0f32], [0.0], [1.0]]);
        assert!(validate_inputs(&smiles, Some(&wrong_rows), 1).is_err());

        let wrong_cols = Targets::from(array![[1.0f32, 0.0], [0.0, 1.0]]);
        assert!(validate_inputs(&smiles, Some(&wrong_cols), 3).is_err());
    }

    #[test]
    fn test_infinite_to_nan() {
        let y = Targets::from(array![[f32::INFINITY, 1.0], [0.0, f32::NEG_INFINITY]]);
        let (_, y) = validate_inputs(&["C", "N"], Some(&y), 2).unwrap();
        let y = y.unwrap();
        assert!(y[[0, 0]].is_nan());
        assert!(y[[1, 1]].is_nan());
        assert_eq!(y[[0, 1]], 1.0);
    }

    #[test]
    fn test_task_types() {
        let y = array![[1.0f32, 0.5], [0.0, 2.0], [f32::NAN, 1.0]];
        assert_eq!(inspect_task_types(&y), vec![true, false]);
    }
}
