//! One interactive lab session: dataset, split, layer stack, training and the
//! results derived from the last completed run.
//!
//! Any change to the data, the split, the seed or the layers drops the
//! previous results, since they no longer describe the current setup.
use crate::activations::ActivationKind;
use crate::boundary::{rasterize, BoundingBox, DecisionGrid, InverseMapping, LinearInverse, NeighborInterpolation};
use crate::config::{DatasetVariant, LabConfig};
use crate::datasets::{ClassLabel, Dataset, Sample};
use crate::error::{LabError, LabWarning, Result};
use crate::metrics::{evaluate, EvaluationResult};
use crate::network::{LayerId, LayerSpec, LayerStack};
use crate::projection::LinearProjection;
use crate::split::{partition, Partition, SplitPercentages, SplitShare, SplitSummary};
use crate::trainer::{CancelFlag, MetricsSnapshot, RunFailure, TrainedModel, Trainer, TrainerState};
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Non-blocking advice about the current layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelHint {
    NoHiddenLayers,
    SoftmaxBeforeOutput,
    HeavyDropout,
}

impl fmt::Display for ModelHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelHint::NoHiddenLayers => "add at least one hidden layer so the network can learn",
            ModelHint::SoftmaxBeforeOutput => "keep softmax for the output; interior softmax bends the boundaries oddly",
            ModelHint::HeavyDropout => "dropout above 0.5 tends to discard useful features; try 0.2-0.3",
        })
    }
}

/// Hints for `layers`. Softmax is only flagged before the last hidden layer.
pub fn hints(layers: &[LayerSpec]) -> Vec<ModelHint> {
    let mut out = Vec::new();
    if layers.is_empty() {
        out.push(ModelHint::NoHiddenLayers);
    }
    let interior = &layers[..layers.len().saturating_sub(1)];
    if interior.iter().any(|l| l.activation == ActivationKind::Softmax) {
        out.push(ModelHint::SoftmaxBeforeOutput);
    }
    if layers.iter().any(|l| l.dropout > 0.5) {
        out.push(ModelHint::HeavyDropout);
    }
    out
}

/// Everything derived from one completed run.
#[derive(Debug, Clone)]
pub struct LabResults<L> {
    pub model: TrainedModel,
    pub evaluation: EvaluationResult<L>,
    pub grid: DecisionGrid<L>,
}

#[derive(Debug)]
pub struct Lab<L> {
    config: LabConfig,
    dataset: Option<Dataset<L>>,
    projection: Option<LinearProjection>,
    split: SplitPercentages,
    layers: LayerStack,
    partition: Option<Partition<L>>,
    trainer: Trainer,
    results: Option<LabResults<L>>,
}

impl<L: ClassLabel> Lab<L> {
    /// A lab with no data and the config's default hidden layer.
    pub fn new(config: LabConfig) -> Result<Self> {
        config.validate()?;
        let split = config.split()?;
        let layers = LayerStack::from_specs(vec![config.default_layer.spec()])?;
        Ok(Self {
            config,
            dataset: None,
            projection: None,
            split,
            layers,
            partition: None,
            trainer: Trainer::new(),
            results: None,
        })
    }

    pub fn for_variant(variant: DatasetVariant) -> Result<Self> {
        Self::new(variant.defaults())
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn dataset(&self) -> Option<&Dataset<L>> {
        self.dataset.as_ref()
    }

    /// Install a dataset and, when known, the projection that produced its
    /// plane coordinates.
    pub fn apply_data(&mut self, dataset: Dataset<L>, projection: Option<LinearProjection>) -> Result<()> {
        if let Some(p) = &projection {
            if p.feature_count() != dataset.feature_count() {
                return Err(LabError::InvalidDataset(format!(
                    "projection expects {} features, dataset has {}",
                    p.feature_count(),
                    dataset.feature_count()
                )));
            }
        }
        info!(samples = dataset.len(), variant = %self.config.variant, "dataset applied");
        self.dataset = Some(dataset);
        self.projection = projection;
        self.repartition();
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.config.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.config.seed = seed;
        self.repartition();
    }

    pub fn split(&self) -> SplitPercentages {
        self.split
    }

    pub fn set_train_percent(&mut self, value: u32) {
        self.split = self.split.with_train(value);
        self.repartition();
    }

    pub fn set_val_percent(&mut self, value: u32) {
        self.split = self.split.with_val(value);
        self.repartition();
    }

    pub fn proportions(&self) -> [SplitShare; 3] {
        self.split.proportions()
    }

    /// Returns the clamped value actually stored.
    pub fn set_epochs(&mut self, epochs: usize) -> usize {
        self.config.epochs = self.config.clamp_epochs(epochs);
        self.config.epochs
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    /// Mutable access to the layer stack. Drops the current results.
    pub fn layers_mut(&mut self) -> &mut LayerStack {
        self.reset();
        &mut self.layers
    }

    /// Append a layer shaped like the config's default with the added-layer width.
    pub fn add_layer(&mut self) -> Result<LayerId> {
        let mut spec = self.config.default_layer.spec();
        spec.units = self.config.added_layer_units;
        self.layers_mut().push(spec)
    }

    pub fn partition(&self) -> Option<&Partition<L>> {
        self.partition.as_ref()
    }

    pub fn summary(&self) -> SplitSummary {
        self.partition.as_ref().map_or(
            SplitSummary {
                train: 0,
                validation: 0,
                test: 0,
            },
            Partition::summary,
        )
    }

    pub fn warnings(&self) -> Vec<LabWarning> {
        self.partition.as_ref().map(Partition::warnings).unwrap_or_default()
    }

    pub fn hints(&self) -> Vec<ModelHint> {
        hints(self.layers.specs())
    }

    pub fn trainer_state(&self) -> TrainerState {
        self.trainer.state()
    }

    pub fn results(&self) -> Option<&LabResults<L>> {
        self.results.as_ref()
    }

    /// Drop the last results and return the trainer to idle.
    pub fn reset(&mut self) {
        self.results = None;
        self.trainer = Trainer::new();
    }

    /// Train on the current partition, then evaluate on the test split and
    /// rasterize the decision grid.
    pub async fn train(
        &mut self,
        progress: Option<&UnboundedSender<MetricsSnapshot>>,
        cancel: &CancelFlag,
    ) -> std::result::Result<&LabResults<L>, RunFailure> {
        self.reset();
        let partition = self
            .partition
            .as_ref()
            .ok_or_else(|| LabError::InvalidConfiguration("no dataset applied".into()))?;
        let prepared = self
            .trainer
            .prepare(partition, self.layers.specs(), &self.config.training())?;
        let model = self.trainer.run(prepared, progress, cancel).await?;

        let results = self.derive_results(model, &partition.test)?;
        Ok(&*self.results.insert(results))
    }

    /// Evaluate and rasterize a completed run. Failures keep the run's history.
    fn derive_results(
        &self,
        model: TrainedModel,
        test: &[Sample<L>],
    ) -> std::result::Result<LabResults<L>, RunFailure> {
        let derived = evaluate(&model, test, self.config.seed, self.config.preview_count)
            .and_then(|evaluation| Ok((evaluation, self.decision_grid(&model)?)));
        match derived {
            Ok((evaluation, grid)) => Ok(LabResults { model, evaluation, grid }),
            Err(error) => Err(RunFailure {
                error,
                history: model.history().clone(),
            }),
        }
    }

    fn decision_grid(&self, model: &TrainedModel) -> Result<DecisionGrid<L>> {
        let Some(dataset) = &self.dataset else {
            return Ok(DecisionGrid::empty());
        };
        let samples = dataset.samples();
        let mapping: Box<dyn InverseMapping> = match (self.config.variant, &self.projection) {
            (DatasetVariant::Flowers, Some(p)) => Box::new(LinearInverse(p.clone())),
            _ => Box::new(NeighborInterpolation::with_params(
                samples,
                dataset.feature_count(),
                self.config.neighbors,
                self.config.neighbor_epsilon,
            )),
        };
        rasterize(
            model,
            mapping.as_ref(),
            BoundingBox::from_samples(samples),
            self.config.grid_resolution,
        )
    }

    fn repartition(&mut self) {
        self.reset();
        self.partition = self
            .dataset
            .as_ref()
            .map(|d| partition(d.samples(), self.config.seed, self.split));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{generate_galaxies, GalaxyClass};
    use crate::trainer::TrainingConfig;

    #[test]
    fn hints_flag_each_smell() {
        assert_eq!(hints(&[]), vec![ModelHint::NoHiddenLayers]);
        let layers = vec![
            LayerSpec::new(8, ActivationKind::Softmax),
            LayerSpec::new(4, ActivationKind::Relu).with_dropout(0.6),
        ];
        assert_eq!(hints(&layers), vec![ModelHint::SoftmaxBeforeOutput, ModelHint::HeavyDropout]);
        // a trailing softmax layer is fine
        assert!(hints(&[LayerSpec::new(8, ActivationKind::Softmax)]).is_empty());
    }

    #[test]
    fn reconfiguring_repartitions() {
        let mut lab = Lab::<GalaxyClass>::for_variant(DatasetVariant::Galaxies).unwrap();
        lab.apply_data(generate_galaxies(20, 3), None).unwrap();
        assert_eq!(lab.summary().total(), 60);
        let before = lab.partition().cloned();
        lab.set_seed(99);
        assert_ne!(lab.partition().cloned(), before);
        lab.set_train_percent(50);
        assert_eq!(lab.summary().train, 30);
    }

    #[test]
    fn epochs_and_layers_follow_config() {
        let mut lab = Lab::<GalaxyClass>::for_variant(DatasetVariant::Galaxies).unwrap();
        assert_eq!(lab.set_epochs(99), 30);
        assert_eq!(lab.layers().len(), 1);
        assert_eq!(lab.layers().specs()[0].dropout, 0.1);
        let id = lab.add_layer().unwrap();
        assert_eq!(lab.layers().get(id).map(|l| l.units), Some(8));
    }

    #[tokio::test]
    async fn failed_evaluation_keeps_the_run_history() {
        let mut lab = Lab::<GalaxyClass>::for_variant(DatasetVariant::Galaxies).unwrap();
        lab.apply_data(generate_galaxies(10, 4), None).unwrap();
        let parts = lab.partition().cloned().unwrap();
        let config = TrainingConfig { epochs: 3, ..Default::default() };
        let trainer = Trainer::new();
        let prepared = trainer.prepare(&parts, lab.layers().specs(), &config).unwrap();
        let model = trainer.run(prepared, None, &CancelFlag::new()).await.unwrap();

        let mut narrow = parts.test.clone();
        for sample in &mut narrow {
            sample.features.truncate(2);
        }
        let failure = lab.derive_results(model, &narrow).unwrap_err();
        assert!(matches!(failure.error, LabError::TrainingFailure(_)));
        assert_eq!(failure.history.len(), 3);
    }

    #[tokio::test]
    async fn training_without_data_is_a_configuration_error() {
        let mut lab = Lab::<GalaxyClass>::for_variant(DatasetVariant::Galaxies).unwrap();
        let err = lab.train(None, &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err.error, LabError::InvalidConfiguration(_)));
        assert!(err.history.is_empty());
    }
}
