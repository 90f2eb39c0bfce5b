//! Decision-boundary rasterization over the 2-D visualization plane.
//!
//! The classifier only understands the original feature space, so every grid
//! cell center is first mapped back to an approximate feature vector by an
//! [`InverseMapping`], then standardized and classified like any other row.
//! The result is a visualization aid and is never used for evaluation.
use crate::datasets::{ClassLabel, Sample};
use crate::error::Result;
use crate::projection::LinearProjection;
use crate::trainer::TrainedModel;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_RESOLUTION: usize = 60;
pub const DEFAULT_NEIGHBORS: usize = 6;
pub const DEFAULT_DISTANCE_EPSILON: f64 = 0.05;

/// Maps a plane point back to original feature space.
pub trait InverseMapping {
    fn reconstruct(&self, x: f64, y: f64) -> Vec<f64>;
}

/// Exact inverse of a known scaler + PCA projection.
#[derive(Debug, Clone)]
pub struct LinearInverse(pub LinearProjection);

impl InverseMapping for LinearInverse {
    fn reconstruct(&self, x: f64, y: f64) -> Vec<f64> {
        self.0.reconstruct(x, y)
    }
}

/// Inverse-distance weighted average of the nearest known samples.
#[derive(Debug, Clone)]
pub struct NeighborInterpolation {
    points: Vec<([f64; 2], Vec<f64>)>,
    feature_count: usize,
    k: usize,
    epsilon: f64,
}

impl NeighborInterpolation {
    pub fn new<L>(samples: &[Sample<L>], feature_count: usize) -> Self {
        Self::with_params(samples, feature_count, DEFAULT_NEIGHBORS, DEFAULT_DISTANCE_EPSILON)
    }

    pub fn with_params<L>(samples: &[Sample<L>], feature_count: usize, k: usize, epsilon: f64) -> Self {
        Self {
            points: samples.iter().map(|s| (s.plane, s.features.clone())).collect(),
            feature_count,
            k: k.max(1),
            epsilon: epsilon.max(f64::MIN_POSITIVE),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl InverseMapping for NeighborInterpolation {
    fn reconstruct(&self, x: f64, y: f64) -> Vec<f64> {
        if self.points.is_empty() {
            return vec![0.0; self.feature_count];
        }
        let mut nearest: Vec<(f64, &[f64])> = self
            .points
            .iter()
            .map(|(p, f)| (((p[0] - x).powi(2) + (p[1] - y).powi(2)).sqrt(), f.as_slice()))
            .collect();
        nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearest.truncate(self.k.min(self.points.len()));
        if nearest[0].0 == 0.0 {
            return nearest[0].1.to_vec();
        }

        let mut sums = vec![0.0; self.feature_count];
        let mut weight_sum = 0.0;
        for &(dist, features) in &nearest {
            let w = 1.0 / dist.max(self.epsilon);
            weight_sum += w;
            for (acc, &v) in sums.iter_mut().zip(features) {
                *acc += w * v;
            }
        }
        if weight_sum <= 0.0 || !weight_sum.is_finite() {
            return nearest[0].1.to_vec();
        }
        sums.into_iter().map(|s| s / weight_sum).collect()
    }
}

/// Extent of the known samples on the plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// `None` when there are no samples to span.
    pub fn from_samples<L>(samples: &[Sample<L>]) -> Option<Self> {
        let first = samples.first()?;
        let init = Self {
            min_x: first.plane[0],
            max_x: first.plane[0],
            min_y: first.plane[1],
            max_y: first.plane[1],
        };
        Some(samples.iter().fold(init, |b, s| Self {
            min_x: b.min_x.min(s.plane[0]),
            max_x: b.max_x.max(s.plane[0]),
            min_y: b.min_y.min(s.plane[1]),
            max_y: b.max_y.max(s.plane[1]),
        }))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Center of cell `(xi, yi)` in a `resolution`² grid.
    pub fn cell_center(&self, xi: usize, yi: usize, resolution: usize) -> (f64, f64) {
        let res = resolution.max(1) as f64;
        (
            self.min_x + (xi as f64 + 0.5) / res * self.width(),
            self.min_y + (yi as f64 + 0.5) / res * self.height(),
        )
    }
}

/// Predicted class index per cell, indexed `cells[xi][yi]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionGrid<L> {
    pub cells: Vec<Vec<usize>>,
    pub bounds: BoundingBox,
    pub class_order: Vec<L>,
    pub resolution: usize,
}

impl<L: ClassLabel> DecisionGrid<L> {
    pub fn empty() -> Self {
        Self {
            cells: Vec::new(),
            bounds: BoundingBox::default(),
            class_order: L::ALL.to_vec(),
            resolution: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn label_at(&self, xi: usize, yi: usize) -> Option<L> {
        let idx = *self.cells.get(xi)?.get(yi)?;
        self.class_order.get(idx).copied()
    }

    /// Share of cells assigned to each class, in class order.
    pub fn coverage(&self) -> Vec<f64> {
        let mut counts = vec![0usize; self.class_order.len()];
        for &c in self.cells.iter().flatten() {
            if let Some(slot) = counts.get_mut(c) {
                *slot += 1;
            }
        }
        let total = counts.iter().sum::<usize>().max(1) as f64;
        counts.into_iter().map(|n| n as f64 / total).collect()
    }
}

/// Classify every cell center of `bounds` at `resolution`² cells.
///
/// No box (no known samples) or a zero resolution yields an empty grid. A
/// degenerate box, e.g. every sample at one point, is still rasterized.
pub fn rasterize<L: ClassLabel>(
    model: &TrainedModel,
    mapping: &dyn InverseMapping,
    bounds: Option<BoundingBox>,
    resolution: usize,
) -> Result<DecisionGrid<L>> {
    let Some(bounds) = bounds.filter(|_| resolution > 0) else {
        return Ok(DecisionGrid::empty());
    };
    let mut rows = Vec::with_capacity(resolution * resolution);
    for xi in 0..resolution {
        for yi in 0..resolution {
            let (x, y) = bounds.cell_center(xi, yi, resolution);
            rows.push(mapping.reconstruct(x, y));
        }
    }
    let predicted = model.predict_raw(&rows)?;
    let cells: Vec<Vec<usize>> = predicted.chunks(resolution).map(<[usize]>::to_vec).collect();
    debug!(resolution, "decision grid rasterized");
    Ok(DecisionGrid {
        cells,
        bounds,
        class_order: L::ALL.to_vec(),
        resolution,
    })
}
