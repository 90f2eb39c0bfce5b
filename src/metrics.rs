//! Test-set evaluation: accuracy, confusion matrix and sample predictions.
use crate::datasets::{ClassLabel, Sample};
use crate::error::Result;
use crate::rng::seed_shuffle;
use crate::trainer::TrainedModel;
use serde::Serialize;
use tracing::{info, warn};

/// Default number of individual predictions surfaced for display.
pub const DEFAULT_PREVIEW: usize = 5;

/// Accuracy
pub fn accuracy(predicted: &[usize], actual: &[usize]) -> Option<f64> {
    if actual.is_empty() {
        return None;
    }
    let correct = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();
    Some(correct as f64 / actual.len() as f64)
}

/// Counts indexed `[actual][predicted]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
}

/// One labeled cell, for table rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfusionCell<L> {
    pub actual: L,
    pub predicted: L,
    pub count: usize,
}

impl ConfusionMatrix {
    /// Simple confusion matrix (for small num_classes). Out-of-range indices are ignored.
    pub fn from_predictions(predicted: &[usize], actual: &[usize], num_classes: usize) -> Self {
        let mut matrix = vec![vec![0; num_classes]; num_classes];
        for (&p, &a) in predicted.iter().zip(actual) {
            if p < num_classes && a < num_classes {
                matrix[a][p] += 1;
            }
        }
        Self { matrix }
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    /// Number of samples whose true class is `actual`.
    pub fn row_total(&self, actual: usize) -> usize {
        self.matrix.get(actual).map_or(0, |row| row.iter().sum())
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.matrix.len()).map(|i| self.matrix[i][i]).sum()
    }

    pub fn labeled_cells<L: ClassLabel>(&self) -> Vec<Vec<ConfusionCell<L>>> {
        L::ALL
            .iter()
            .enumerate()
            .map(|(a, &actual)| {
                L::ALL
                    .iter()
                    .enumerate()
                    .map(|(p, &predicted)| ConfusionCell {
                        actual,
                        predicted,
                        count: self.get(a, p),
                    })
                    .collect()
            })
            .collect()
    }
}

/// A single test sample with the model's guess.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplePrediction<L> {
    pub sample: Sample<L>,
    pub predicted: L,
    pub correct: bool,
}

/// Test-split results. Both optional fields are `None` when the test split is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult<L> {
    pub test_accuracy: Option<f64>,
    pub confusion_matrix: Option<ConfusionMatrix>,
    pub sample_predictions: Vec<SamplePrediction<L>>,
}

impl<L> EvaluationResult<L> {
    pub fn empty() -> Self {
        Self {
            test_accuracy: None,
            confusion_matrix: None,
            sample_predictions: Vec::new(),
        }
    }
}

/// Evaluate `model` on the test split.
///
/// The preview is the first `preview_count` entries of a `seed`-shuffled copy
/// of the (sample, prediction) pairs, so it is stable for a given seed.
pub fn evaluate<L: ClassLabel>(
    model: &TrainedModel,
    test: &[Sample<L>],
    seed: u64,
    preview_count: usize,
) -> Result<EvaluationResult<L>> {
    if test.is_empty() {
        warn!("test split is empty; skipping evaluation");
        return Ok(EvaluationResult::empty());
    }
    let rows: Vec<Vec<f64>> = test.iter().map(|s| s.features.clone()).collect();
    let predicted = model.predict_raw(&rows)?;
    let actual: Vec<usize> = test.iter().map(|s| s.label.index()).collect();

    let test_accuracy = accuracy(&predicted, &actual);
    let confusion = ConfusionMatrix::from_predictions(&predicted, &actual, L::count());

    let pairs: Vec<(&Sample<L>, usize)> = test.iter().zip(predicted.iter().copied()).collect();
    let sample_predictions = seed_shuffle(&pairs, seed)
        .into_iter()
        .take(preview_count)
        .filter_map(|(sample, p)| {
            L::from_index(p).map(|predicted| SamplePrediction {
                sample: sample.clone(),
                predicted,
                correct: predicted == sample.label,
            })
        })
        .collect();

    info!(
        accuracy = test_accuracy.unwrap_or_default(),
        samples = test.len(),
        "evaluation finished"
    );
    Ok(EvaluationResult {
        test_accuracy,
        confusion_matrix: Some(confusion),
        sample_predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::GalaxyClass;
    use proptest::collection::vec;
    use proptest::prelude::*;

    #[test]
    fn accuracy_counts_matches() {
        assert_eq!(accuracy(&[0, 1, 2, 2], &[0, 1, 1, 2]), Some(0.75));
        assert_eq!(accuracy(&[], &[]), None);
    }

    #[test]
    fn matrix_is_actual_by_predicted() {
        let cm = ConfusionMatrix::from_predictions(&[0, 2, 2, 1], &[0, 1, 2, 1], 3);
        assert_eq!(cm.get(1, 2), 1);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.row_total(1), 2);
        assert_eq!(cm.correct(), 3);
        let cells = cm.labeled_cells::<GalaxyClass>();
        assert_eq!(cells[1][2].actual, GalaxyClass::Andromeda);
        assert_eq!(cells[1][2].predicted, GalaxyClass::Centaurus);
        assert_eq!(cells[1][2].count, 1);
    }

    proptest! {
        #[test]
        fn prop_matrix_sums_match_population(
            pairs in vec((0usize..3, 0usize..3), 0..200)
        ) {
            let predicted: Vec<usize> = pairs.iter().map(|p| p.0).collect();
            let actual: Vec<usize> = pairs.iter().map(|p| p.1).collect();
            let cm = ConfusionMatrix::from_predictions(&predicted, &actual, 3);
            prop_assert_eq!(cm.total(), pairs.len());
            for c in 0..3 {
                prop_assert_eq!(cm.row_total(c), actual.iter().filter(|&&a| a == c).count());
            }
        }
    }
}
