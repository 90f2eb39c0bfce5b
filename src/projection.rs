//! Two-component linear projection between feature space and the
//! visualization plane (standard scaling followed by PCA).
use crate::error::{LabError, Result};
use serde::{Deserialize, Serialize};

const POWER_ITERATIONS: usize = 500;

/// Parameters as exported by the front end's `pca-params.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionParams {
    pub components: Vec<Vec<f64>>,
    pub pca_mean: Vec<f64>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// A fitted scaler + PCA basis. Plane coordinates are
/// `components · ((features - mean) / scale - pca_mean)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ProjectionParams")]
pub struct LinearProjection {
    components: [Vec<f64>; 2],
    pca_mean: Vec<f64>,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl TryFrom<ProjectionParams> for LinearProjection {
    type Error = LabError;

    fn try_from(p: ProjectionParams) -> Result<Self> {
        let d = p.mean.len();
        if d == 0 {
            return Err(LabError::InvalidConfiguration("projection has no features".into()));
        }
        if p.components.len() != 2 {
            return Err(LabError::InvalidConfiguration(format!(
                "projection needs exactly 2 components, got {}",
                p.components.len()
            )));
        }
        if p.scale.len() != d || p.pca_mean.len() != d || p.components.iter().any(|c| c.len() != d) {
            return Err(LabError::InvalidConfiguration("projection parameter lengths differ".into()));
        }
        let mut components = p.components.into_iter();
        let first = components.next().unwrap_or_default();
        let second = components.next().unwrap_or_default();
        Ok(Self {
            components: [first, second],
            pca_mean: p.pca_mean,
            mean: p.mean,
            scale: p.scale,
        })
    }
}

impl LinearProjection {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn feature_count(&self) -> usize {
        self.mean.len()
    }

    pub fn params(&self) -> ProjectionParams {
        ProjectionParams {
            components: self.components.to_vec(),
            pca_mean: self.pca_mean.clone(),
            mean: self.mean.clone(),
            scale: self.scale.clone(),
        }
    }

    /// Fit the scaler and the two leading principal axes of `rows`.
    ///
    /// Eigenvectors come from power iteration on the covariance matrix from a
    /// fixed start vector, with the second axis kept orthogonal to the first.
    /// Each axis is signed so its largest-magnitude entry is positive.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        let d = rows.first().map_or(0, Vec::len);
        if n == 0 || d < 2 {
            return Err(LabError::InvalidDataset(
                "projection needs at least one row with two or more features".into(),
            ));
        }
        if rows.iter().any(|r| r.len() != d) {
            return Err(LabError::InvalidDataset("ragged feature rows".into()));
        }

        let mean: Vec<f64> = (0..d)
            .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n as f64)
            .collect();
        let scale: Vec<f64> = (0..d)
            .map(|j| {
                let var = rows.iter().map(|r| (r[j] - mean[j]).powi(2)).sum::<f64>() / n as f64;
                let std = var.sqrt();
                if std > 1e-12 { std } else { 1.0 }
            })
            .collect();
        let scaled: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| (0..d).map(|j| (r[j] - mean[j]) / scale[j]).collect())
            .collect();
        let pca_mean: Vec<f64> = (0..d)
            .map(|j| scaled.iter().map(|r| r[j]).sum::<f64>() / n as f64)
            .collect();

        let denom = if n > 1 { (n - 1) as f64 } else { 1.0 };
        let mut cov = vec![vec![0.0; d]; d];
        for r in &scaled {
            for i in 0..d {
                for j in 0..d {
                    cov[i][j] += (r[i] - pca_mean[i]) * (r[j] - pca_mean[j]) / denom;
                }
            }
        }

        let first = leading_axis(&cov, &[]);
        let second = leading_axis(&cov, std::slice::from_ref(&first));
        Ok(Self {
            components: [first, second],
            pca_mean,
            mean,
            scale,
        })
    }

    /// Map original features onto the plane.
    pub fn project(&self, features: &[f64]) -> [f64; 2] {
        let centered: Vec<f64> = features
            .iter()
            .zip(self.mean.iter().zip(&self.scale).zip(&self.pca_mean))
            .map(|(&v, ((&m, &s), &c))| (v - m) / s - c)
            .collect();
        [dot(&self.components[0], &centered), dot(&self.components[1], &centered)]
    }

    /// Approximate original features for a plane point.
    pub fn reconstruct(&self, x: f64, y: f64) -> Vec<f64> {
        (0..self.feature_count())
            .map(|j| {
                let scaled = self.pca_mean[j] + x * self.components[0][j] + y * self.components[1][j];
                scaled * self.scale[j] + self.mean[j]
            })
            .collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}

fn orthogonalize(v: &mut [f64], against: &[Vec<f64>]) {
    for axis in against {
        let p = dot(v, axis);
        v.iter_mut().zip(axis).for_each(|(x, a)| *x -= p * a);
    }
}

fn leading_axis(cov: &[Vec<f64>], against: &[Vec<f64>]) -> Vec<f64> {
    let d = cov.len();
    // Start vectors differ per axis so the second one is not parallel to the first.
    let mut v: Vec<f64> = (0..d).map(|j| 1.0 + (j + against.len()) as f64 * 0.37).collect();
    orthogonalize(&mut v, against);
    if normalize(&mut v) <= 1e-12 {
        v = (0..d).map(|j| if j == against.len() % d { 1.0 } else { 0.0 }).collect();
        orthogonalize(&mut v, against);
        normalize(&mut v);
    }
    for _ in 0..POWER_ITERATIONS {
        let mut w: Vec<f64> = cov.iter().map(|row| dot(row, &v)).collect();
        orthogonalize(&mut w, against);
        if normalize(&mut w) <= 1e-12 {
            break;
        }
        v = w;
    }
    let pivot = v
        .iter()
        .copied()
        .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
    if pivot < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
    v
}
