//! Per-feature standardization fitted on the training split.
use crate::error::{LabError, Result};
use serde::Serialize;

/// Floor applied to every fitted standard deviation.
pub const STD_EPSILON: f64 = 1e-6;

/// Per-feature mean and (floored) population standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStats {
    pub means: Vec<f64>,
    pub std: Vec<f64>,
}

impl FeatureStats {
    /// Fit on training rows. Only the training split should ever be passed here.
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| LabError::InvalidConfiguration("cannot fit feature stats on an empty split".into()))?;
        let width = first.as_ref().len();
        if rows.iter().any(|r| r.as_ref().len() != width) {
            return Err(LabError::TrainingFailure("feature rows have different lengths".into()));
        }
        let n = rows.len() as f64;
        let means: Vec<f64> = (0..width)
            .map(|j| rows.iter().map(|r| r.as_ref()[j]).sum::<f64>() / n)
            .collect();
        let std = (0..width)
            .map(|j| {
                let variance = rows
                    .iter()
                    .map(|r| (r.as_ref()[j] - means[j]).powi(2))
                    .sum::<f64>()
                    / n;
                variance.sqrt().max(STD_EPSILON)
            })
            .collect();
        Ok(Self { means, std })
    }

    pub fn feature_count(&self) -> usize {
        self.means.len()
    }

    pub fn apply_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.std))
            .map(|(&v, (&m, &s))| (v - m) / s)
            .collect()
    }

    pub fn apply<R: AsRef<[f64]>>(&self, rows: &[R]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.apply_row(r.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn standardized_training_rows_have_zero_mean_unit_std() {
        let rows = vec![
            vec![5.1, 3.5, 1.4],
            vec![4.9, 3.0, 1.3],
            vec![7.0, 3.2, 4.7],
            vec![6.3, 3.3, 6.0],
            vec![5.8, 2.7, 5.1],
        ];
        let stats = FeatureStats::fit(&rows).unwrap();
        let z = stats.apply(&rows);
        for j in 0..3 {
            let mean = z.iter().map(|r| r[j]).sum::<f64>() / z.len() as f64;
            let var = z.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / z.len() as f64;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(var.sqrt(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn constant_feature_is_floored() {
        let rows = vec![vec![2.0, 1.0], vec![2.0, 3.0]];
        let stats = FeatureStats::fit(&rows).unwrap();
        assert_eq!(stats.std[0], STD_EPSILON);
        assert_eq!(stats.apply_row(&[2.0, 2.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn population_std_is_used() {
        let stats = FeatureStats::fit(&[[1.0], [3.0]]).unwrap();
        assert_eq!(stats.means, vec![2.0]);
        assert_eq!(stats.std, vec![1.0]);
    }

    #[test]
    fn empty_split_is_rejected() {
        let rows: Vec<Vec<f64>> = Vec::new();
        assert!(matches!(FeatureStats::fit(&rows), Err(LabError::InvalidConfiguration(_))));
    }
}
