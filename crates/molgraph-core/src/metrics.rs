//! Evaluation metrics over `[n_samples, n_tasks]` arrays.
//!
//! NaN labels are masked per task and scores are averaged over the tasks that
//! still have data.
use crate::error::{MolError, Result};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::warn;

/// Built-in evaluation metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    RocAuc,
    Accuracy,
    Mse,
    Rmse,
    Mae,
    R2,
}

impl Metric {
    pub fn higher_is_better(&self) -> bool {
        matches!(self, Metric::RocAuc | Metric::Accuracy | Metric::R2)
    }

    pub fn compute(&self, y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
        match self {
            Metric::RocAuc => roc_auc_score(y_true, y_pred),
            Metric::Accuracy => accuracy_score(y_true, y_pred),
            Metric::Mse => mean_squared_error(y_true, y_pred),
            Metric::Rmse => root_mean_squared_error(y_true, y_pred),
            Metric::Mae => mean_absolute_error(y_true, y_pred),
            Metric::R2 => r2_score(y_true, y_pred),
        }
    }
}

fn check_shapes(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<()> {
    if y_true.shape() != y_pred.shape() {
        return Err(MolError::Metric(format!(
            "shape mismatch between labels {:?} and predictions {:?}",
            y_true.shape(),
            y_pred.shape()
        )));
    }
    Ok(())
}

/// Labelled `(truth, prediction)` pairs of one task.
fn masked_pairs(t: ArrayView1<f32>, p: ArrayView1<f32>) -> Vec<(f32, f32)> {
    t.iter()
        .zip(p.iter())
        .filter(|(t, _)| !t.is_nan())
        .map(|(&t, &p)| (t, p))
        .collect()
}

/// Apply `score` to every task with at least one label and average.
fn per_task_mean<F>(y_true: &Array2<f32>, y_pred: &Array2<f32>, score: F) -> Result<f32>
where
    F: Fn(&[(f32, f32)]) -> Option<f32>,
{
    check_shapes(y_true, y_pred)?;
    let scores: Vec<f32> = y_true
        .columns()
        .into_iter()
        .zip(y_pred.columns())
        .map(|(t, p)| masked_pairs(t, p))
        .filter(|pairs| !pairs.is_empty())
        .filter_map(|pairs| score(&pairs))
        .collect();
    if scores.is_empty() {
        return Ok(f32::NAN);
    }
    Ok(scores.iter().sum::<f32>() / scores.len() as f32)
}

/// Average ranks (1-based), ties share the mean of their positions.
fn average_ranks(values: &[f32]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0f64; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

fn binary_auc(pairs: &[(f32, f32)]) -> Option<f32> {
    let n_pos = pairs.iter().filter(|(t, _)| *t > 0.5).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let scores: Vec<f32> = pairs.iter().map(|(_, p)| *p).collect();
    let ranks = average_ranks(&scores);
    let pos_rank_sum: f64 = pairs
        .iter()
        .zip(ranks)
        .filter(|((t, _), _)| *t > 0.5)
        .map(|(_, r)| r)
        .sum();
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some((u / (n_pos as f64 * n_neg as f64)) as f32)
}

/// Mean ROC-AUC over tasks that contain both classes.
pub fn roc_auc_score(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
    let score = per_task_mean(y_true, y_pred, binary_auc)?;
    if score.is_nan() {
        warn!("ROC-AUC is undefined: no task has both positive and negative labels");
    }
    Ok(score)
}

/// Mean accuracy with predictions thresholded at 0.5.
pub fn accuracy_score(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
    per_task_mean(y_true, y_pred, |pairs| {
        let correct = pairs
            .iter()
            .filter(|(t, p)| (*p >= 0.5) == (*t >= 0.5))
            .count();
        Some(correct as f32 / pairs.len() as f32)
    })
}

pub fn mean_squared_error(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
    per_task_mean(y_true, y_pred, |pairs| {
        Some(pairs.iter().map(|(t, p)| (t - p).powi(2)).sum::<f32>() / pairs.len() as f32)
    })
}

pub fn root_mean_squared_error(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
    per_task_mean(y_true, y_pred, |pairs| {
        let mse = pairs.iter().map(|(t, p)| (t - p).powi(2)).sum::<f32>() / pairs.len() as f32;
        Some(mse.sqrt())
    })
}

pub fn mean_absolute_error(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
    per_task_mean(y_true, y_pred, |pairs| {
        Some(pairs.iter().map(|(t, p)| (t - p).abs()).sum::<f32>() / pairs.len() as f32)
    })
}

/// Coefficient of determination. A task with constant labels scores 1.0 when
/// predicted exactly and 0.0 otherwise.
pub fn r2_score(y_true: &Array2<f32>, y_pred: &Array2<f32>) -> Result<f32> {
    per_task_mean(y_true, y_pred, |pairs| {
        let mean = pairs.iter().map(|(t, _)| t).sum::<f32>() / pairs.len() as f32;
        let ss_res: f32 = pairs.iter().map(|(t, p)| (t - p).powi(2)).sum();
        let ss_tot: f32 = pairs.iter().map(|(t, _)| (t - mean).powi(2)).sum();
        if ss_tot == 0.0 {
            Some(if ss_res == 0.0 { 1.0 } else { 0.0 })
        } else {
            Some(1.0 - ss_res / ss_tot)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::str::FromStr;

    #[test]
    fn test_roc_auc() {
        let y = array![[0.0f32], [0.0], [1.0], [1.0]];
        let p = array![[0.1f32], [0.4], [0.35], [0.8]];
        let auc = roc_auc_score(&y, &p).unwrap();
        assert!((auc - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_roc_auc_masks_and_skips() {
        // second task has one class only and is skipped
        let y = array![[0.0f32, 1.0], [1.0, 1.0], [f32::NAN, 1.0]];
        let p = array![[0.2f32, 0.3], [0.9, 0.4], [0.0, 0.5]];
        assert_eq!(roc_auc_score(&y, &p).unwrap(), 1.0);

        let single = array![[1.0f32], [1.0]];
        assert!(roc_auc_score(&single, &single).unwrap().is_nan());
    }

    #[test]
    fn test_tied_scores() {
        let y = array![[0.0f32], [1.0]];
        let p = array![[0.5f32], [0.5]];
        assert_eq!(roc_auc_score(&y, &p).unwrap(), 0.5);
    }

    #[test]
    fn test_regression_metrics() {
        let y = array![[1.0f32, 2.0], [2.0, f32::NAN], [3.0, 4.0]];
        let p = array![[1.0f32, 3.0], [3.0, 100.0], [5.0, 4.0]];
        // task 0: errors 0,1,2 ; task 1: errors 1,0
        let mae = mean_absolute_error(&y, &p).unwrap();
        assert!((mae - (1.0 + 0.5) / 2.0).abs() < 1e-6);
        let mse = mean_squared_error(&y, &p).unwrap();
        assert!((mse - (5.0 / 3.0 + 0.5) / 2.0).abs() < 1e-6);
        let rmse = root_mean_squared_error(&y, &p).unwrap();
        assert!((rmse - ((5.0f32 / 3.0).sqrt() + 0.5f32.sqrt()) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_r2_and_accuracy() {
        let y = array![[1.0f32], [2.0], [3.0]];
        assert_eq!(r2_score(&y, &y).unwrap(), 1.0);
        let mean_pred = array![[2.0f32], [2.0], [2.0]];
        assert!(r2_score(&y, &mean_pred).unwrap().abs() < 1e-6);

        let labels = array![[1.0f32], [0.0], [1.0], [0.0]];
        let probs = array![[0.9f32], [0.2], [0.4], [0.6]];
        assert_eq!(accuracy_score(&labels, &probs).unwrap(), 0.5);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::from_str("roc_auc").unwrap(), Metric::RocAuc);
        assert_eq!(Metric::Mae.to_string(), "mae");
        assert!(Metric::R2.higher_is_better());
        assert!(!Metric::Rmse.higher_is_better());
        let y = array![[1.0f32], [2.0]];
        assert!(Metric::Mse.compute(&y, &array![[1.0f32, 2.0]]).is_err());
    }
}
