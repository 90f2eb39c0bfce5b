//! Categorical cross-entropy over softmax outputs.
use crate::error::{LabError, Result};
use crate::layers::Matrix;

const EPS: f64 = 1e-12;

/// Cross-entropy loss for one sample (assumes `pred` is a probability distribution)
pub fn cross_entropy_loss(pred: &[f64], target: &[f64]) -> Result<f64> {
    if pred.len() != target.len() {
        return Err(LabError::TrainingFailure(format!(
            "prediction width {} does not match target width {}",
            pred.len(),
            target.len()
        )));
    }
    Ok(pred
        .iter()
        .zip(target)
        .map(|(&p, &t)| -t * p.clamp(EPS, 1.0 - EPS).ln())
        .sum())
}

/// CE deriv for softmax + CE: softmax(x) - target
pub fn cross_entropy_deriv(pred: &[f64], target: &[f64]) -> Result<Vec<f64>> {
    if pred.len() != target.len() {
        return Err(LabError::TrainingFailure("prediction/target size mismatch".into()));
    }
    Ok(pred.iter().zip(target).map(|(&p, &t)| p - t).collect())
}

/// Mean cross-entropy over a batch.
pub fn batch_cross_entropy(pred: &Matrix, target: &Matrix) -> Result<f64> {
    if pred.len() != target.len() {
        return Err(LabError::TrainingFailure("batch size mismatch".into()));
    }
    if pred.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for (p, t) in pred.iter().zip(target) {
        total += cross_entropy_loss(p, t)?;
    }
    Ok(total / pred.len() as f64)
}

/// Gradient of the batch-mean loss w.r.t. the logits feeding the softmax.
pub fn batch_cross_entropy_deriv(pred: &Matrix, target: &Matrix) -> Result<Matrix> {
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(target)
        .map(|(p, t)| Ok(cross_entropy_deriv(p, t)?.into_iter().map(|g| g / n).collect()))
        .collect()
}
