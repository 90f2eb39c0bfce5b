//! The training run: state machine, per-epoch metrics stream and cooperative
//! cancellation.
//!
//! A run is split in two phases. [`Trainer::prepare`] is synchronous and does
//! every check that can fail before computation starts (empty training split,
//! bad hyper-parameters, invalid layers); it also fits the feature statistics
//! on the training split and builds the network. [`Trainer::run`] then owns the
//! classifier for the duration of the epoch loop, sends one
//! [`MetricsSnapshot`] per epoch on the progress channel and yields to the
//! scheduler between epochs so the caller can render progress or cancel.
use crate::datasets::{one_hot, ClassLabel, Sample};
use crate::error::{LabError, Result};
use crate::layers::Matrix;
use crate::network::{Classifier, LayerSpec, NetworkBuilder};
use crate::optim::Adam;
use crate::rng::SequenceGenerator;
use crate::split::{Partition, Split};
use crate::standardize::FeatureStats;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Upper bound on epochs for any single run.
pub const MAX_EPOCHS: usize = 500;

/// Lifecycle of a trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainerState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl TrainerState {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => TrainerState::Running,
            2 => TrainerState::Completed,
            3 => TrainerState::Failed,
            _ => TrainerState::Idle,
        }
    }
}

/// Metrics recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// 1-based epoch number.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// `None` when the validation split is empty.
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// Append-only sequence of snapshots for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsHistory {
    snapshots: Vec<MetricsSnapshot>,
}

impl MetricsHistory {
    fn push(&mut self, snapshot: MetricsSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn snapshots(&self) -> &[MetricsSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn last(&self) -> Option<&MetricsSnapshot> {
        self.snapshots.last()
    }

    fn series(&self, pick: impl Fn(&MetricsSnapshot) -> Option<f64>) -> Vec<(usize, f64)> {
        self.snapshots
            .iter()
            .filter_map(|s| pick(s).map(|v| (s.epoch, v)))
            .collect()
    }

    /// `(epoch, value)` points for charts.
    pub fn train_loss(&self) -> Vec<(usize, f64)> {
        self.series(|s| Some(s.train_loss))
    }

    pub fn train_accuracy(&self) -> Vec<(usize, f64)> {
        self.series(|s| Some(s.train_accuracy))
    }

    pub fn val_loss(&self) -> Vec<(usize, f64)> {
        self.series(|s| s.val_loss)
    }

    pub fn val_accuracy(&self) -> Vec<(usize, f64)> {
        self.series(|s| s.val_accuracy)
    }
}

/// Hyper-parameters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Seeds weight init, epoch shuffles and dropout masks.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 30,
            batch_size: 32,
            learning_rate: 0.01,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.epochs > MAX_EPOCHS {
            return Err(LabError::InvalidConfiguration(format!(
                "epochs must be within 1..={MAX_EPOCHS}, got {}",
                self.epochs
            )));
        }
        if self.batch_size == 0 {
            return Err(LabError::InvalidConfiguration("batch size must be > 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(LabError::InvalidConfiguration("learning rate must be finite and > 0".into()));
        }
        Ok(())
    }
}

/// Shared flag checked at every epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A validated run, ready for [`Trainer::run`].
#[derive(Debug)]
pub struct PreparedRun {
    classifier: Classifier,
    stats: FeatureStats,
    train_x: Matrix,
    train_y: Matrix,
    val_x: Matrix,
    val_y: Matrix,
    config: TrainingConfig,
    rng: SequenceGenerator,
}

impl PreparedRun {
    pub fn stats(&self) -> &FeatureStats {
        &self.stats
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

/// Outcome of a completed run, handed to the evaluator and the rasterizer.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    classifier: Classifier,
    stats: FeatureStats,
    history: MetricsHistory,
}

impl TrainedModel {
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn stats(&self) -> &FeatureStats {
        &self.stats
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    /// Standardize raw feature rows with the fitted stats and predict classes.
    pub fn predict_raw(&self, rows: &[Vec<f64>]) -> Result<Vec<usize>> {
        self.classifier.predict_classes(&self.stats.apply(rows))
    }
}

/// A failed or cancelled run with whatever history it collected.
#[derive(Debug, Error)]
#[error("{error} ({} epoch(s) recorded)", .history.len())]
pub struct RunFailure {
    #[source]
    pub error: LabError,
    pub history: MetricsHistory,
}

impl From<LabError> for RunFailure {
    fn from(error: LabError) -> Self {
        Self {
            error,
            history: MetricsHistory::default(),
        }
    }
}

/// Runs at most one training job at a time.
#[derive(Debug)]
pub struct Trainer {
    state: AtomicU8,
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks the trainer failed if a run future is dropped before finishing.
struct RunGuard<'a> {
    state: &'a AtomicU8,
    finished: bool,
}

impl RunGuard<'_> {
    fn finish(mut self, outcome: TrainerState) {
        self.state.store(outcome.to_u8(), Ordering::SeqCst);
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.store(TrainerState::Failed.to_u8(), Ordering::SeqCst);
        }
    }
}

fn features_of<L>(samples: &[Sample<L>]) -> Vec<&[f64]> {
    samples.iter().map(|s| s.features.as_slice()).collect()
}

fn targets_of<L: ClassLabel>(samples: &[Sample<L>]) -> Matrix {
    samples.iter().map(|s| one_hot(s.label.index(), L::count())).collect()
}

impl Trainer {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TrainerState::Idle.to_u8()),
        }
    }

    pub fn state(&self) -> TrainerState {
        TrainerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Validate the request, fit feature stats on the training split only,
    /// standardize every split and build the network.
    pub fn prepare<L: ClassLabel>(
        &self,
        partition: &Partition<L>,
        layers: &[LayerSpec],
        config: &TrainingConfig,
    ) -> Result<PreparedRun> {
        if self.state() == TrainerState::Running {
            return Err(LabError::RunInProgress);
        }
        config.validate()?;
        if partition.train.is_empty() {
            return Err(LabError::InvalidConfiguration("training split is empty".into()));
        }
        for spec in layers {
            spec.validate()?;
        }
        if partition.validation.is_empty() {
            warn!(split = %Split::Validation, "no validation samples; validation metrics will be empty");
        }

        let mut rng = SequenceGenerator::new(config.seed);
        let (stats, classifier) = FeatureStats::fit(&features_of(&partition.train))
            .and_then(|stats| {
                let classifier = NetworkBuilder::new(stats.feature_count(), L::count()).build(layers, &mut rng)?;
                Ok((stats, classifier))
            })
            .map_err(|error| {
                if matches!(error, LabError::TrainingFailure(_)) {
                    warn!(%error, "network construction failed");
                    self.state.store(TrainerState::Failed.to_u8(), Ordering::SeqCst);
                }
                error
            })?;
        debug!(%classifier, "network built");

        Ok(PreparedRun {
            train_x: stats.apply(&features_of(&partition.train)),
            train_y: targets_of(&partition.train),
            val_x: stats.apply(&features_of(&partition.validation)),
            val_y: targets_of(&partition.validation),
            classifier,
            stats,
            config: *config,
            rng,
        })
    }

    /// Run the epoch loop. Rejected with `RunInProgress` if another run on
    /// this trainer has not finished.
    pub async fn run(
        &self,
        prepared: PreparedRun,
        progress: Option<&UnboundedSender<MetricsSnapshot>>,
        cancel: &CancelFlag,
    ) -> std::result::Result<TrainedModel, RunFailure> {
        let running = TrainerState::Running.to_u8();
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| (s != running).then_some(running))
            .map_err(|_| RunFailure::from(LabError::RunInProgress))?;
        let guard = RunGuard {
            state: &self.state,
            finished: false,
        };

        let outcome = epoch_loop(prepared, progress, cancel).await;
        match &outcome {
            Ok(model) => {
                info!(epochs = model.history.len(), "training completed");
                guard.finish(TrainerState::Completed);
            }
            Err(failure) => {
                warn!(error = %failure.error, epochs = failure.history.len(), "training failed");
                guard.finish(TrainerState::Failed);
            }
        }
        outcome
    }
}

async fn epoch_loop(
    prepared: PreparedRun,
    progress: Option<&UnboundedSender<MetricsSnapshot>>,
    cancel: &CancelFlag,
) -> std::result::Result<TrainedModel, RunFailure> {
    let PreparedRun {
        mut classifier,
        stats,
        train_x,
        train_y,
        val_x,
        val_y,
        config,
        mut rng,
    } = prepared;
    let mut optimizer = Adam::default_params(config.learning_rate);
    let mut history = MetricsHistory::default();
    let mut order: Vec<usize> = (0..train_x.len()).collect();

    info!(
        epochs = config.epochs,
        train = train_x.len(),
        validation = val_x.len(),
        lr = config.learning_rate,
        "training started"
    );

    for epoch in 1..=config.epochs {
        if cancel.is_cancelled() {
            return Err(RunFailure {
                error: LabError::Cancelled {
                    epochs_completed: epoch - 1,
                },
                history,
            });
        }
        order.shuffle(&mut rng);
        let snapshot = match run_epoch(
            epoch,
            &mut classifier,
            &mut optimizer,
            &mut rng,
            &order,
            config.batch_size,
            (&train_x, &train_y),
            (&val_x, &val_y),
        ) {
            Ok(snapshot) => snapshot,
            Err(error) => return Err(RunFailure { error, history }),
        };
        debug!(
            epoch,
            loss = snapshot.train_loss,
            accuracy = snapshot.train_accuracy,
            val_loss = ?snapshot.val_loss,
            val_accuracy = ?snapshot.val_accuracy,
            "epoch finished"
        );
        history.push(snapshot.clone());
        if let Some(tx) = progress {
            if tx.send(snapshot).is_err() {
                debug!(epoch, "progress receiver dropped");
            }
        }
        tokio::task::yield_now().await;
    }

    Ok(TrainedModel {
        classifier,
        stats,
        history,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_epoch(
    epoch: usize,
    classifier: &mut Classifier,
    optimizer: &mut Adam,
    rng: &mut SequenceGenerator,
    order: &[usize],
    batch_size: usize,
    (train_x, train_y): (&Matrix, &Matrix),
    (val_x, val_y): (&Matrix, &Matrix),
) -> Result<MetricsSnapshot> {
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    for batch in order.chunks(batch_size) {
        let x: Matrix = batch.iter().map(|&i| train_x[i].clone()).collect();
        let y: Matrix = batch.iter().map(|&i| train_y[i].clone()).collect();
        let outcome = classifier.train_batch(&x, &y, optimizer, rng)?;
        loss_sum += outcome.loss * outcome.size as f64;
        correct += outcome.correct;
    }
    let seen = order.len().max(1) as f64;
    let train_loss = loss_sum / seen;
    if !train_loss.is_finite() || !classifier.is_finite() {
        return Err(LabError::TrainingFailure(format!("numerical divergence in epoch {epoch}")));
    }

    let (val_loss, val_accuracy) = if val_x.is_empty() {
        (None, None)
    } else {
        let (loss, accuracy) = classifier.score(val_x, val_y)?;
        (Some(loss), Some(accuracy))
    };

    Ok(MetricsSnapshot {
        epoch,
        train_loss,
        train_accuracy: correct as f64 / seen,
        val_loss,
        val_accuracy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activations::ActivationKind;
    use crate::datasets::Species;
    use tokio::sync::mpsc;

    fn blob_partition(n_train: usize, n_val: usize) -> Partition<Species> {
        let make = |count: usize, offset: usize| -> Vec<Sample<Species>> {
            (0..count)
                .map(|i| {
                    let class = (i + offset) % 3;
                    let c = class as f64 * 3.0;
                    let jitter = ((i * 7) % 5) as f64 * 0.1;
                    Sample {
                        id: offset + i,
                        features: vec![c + jitter, c - jitter, c, 1.0 + jitter],
                        plane: [c, jitter],
                        label: Species::ALL[class],
                    }
                })
                .collect()
        };
        Partition {
            train: make(n_train, 0),
            validation: make(n_val, 1000),
            test: Vec::new(),
        }
    }

    fn layers() -> Vec<LayerSpec> {
        vec![LayerSpec::new(8, ActivationKind::Relu)]
    }

    #[tokio::test]
    async fn emits_one_snapshot_per_epoch() {
        let trainer = Trainer::new();
        let config = TrainingConfig { epochs: 7, ..Default::default() };
        let prepared = trainer.prepare(&blob_partition(60, 15), &layers(), &config).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let model = trainer.run(prepared, Some(&tx), &CancelFlag::new()).await.unwrap();
        drop(tx);

        let mut streamed = Vec::new();
        while let Some(s) = rx.recv().await {
            streamed.push(s);
        }
        assert_eq!(streamed.len(), 7);
        assert_eq!(model.history().snapshots(), streamed.as_slice());
        let epochs: Vec<usize> = streamed.iter().map(|s| s.epoch).collect();
        assert_eq!(epochs, (1..=7).collect::<Vec<_>>());
        assert!(streamed.iter().all(|s| s.val_loss.is_some() && s.val_accuracy.is_some()));
        assert_eq!(trainer.state(), TrainerState::Completed);
    }

    #[tokio::test]
    async fn learns_separable_blobs() {
        let trainer = Trainer::new();
        let config = TrainingConfig {
            epochs: 40,
            learning_rate: 0.05,
            ..Default::default()
        };
        let prepared = trainer.prepare(&blob_partition(90, 30), &layers(), &config).unwrap();
        let model = trainer.run(prepared, None, &CancelFlag::new()).await.unwrap();
        let last = model.history().last().unwrap();
        assert!(last.train_accuracy > 0.9, "{last:?}");
        let first = &model.history().snapshots()[0];
        assert!(last.train_loss < first.train_loss);
    }

    #[tokio::test]
    async fn same_seed_same_history() {
        let partition = blob_partition(45, 9);
        let config = TrainingConfig { epochs: 4, ..Default::default() };
        let a = Trainer::new();
        let b = Trainer::new();
        let ha = a
            .run(a.prepare(&partition, &layers(), &config).unwrap(), None, &CancelFlag::new())
            .await
            .unwrap();
        let hb = b
            .run(b.prepare(&partition, &layers(), &config).unwrap(), None, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(ha.history(), hb.history());
    }

    #[tokio::test]
    async fn missing_validation_split_leaves_fields_empty() {
        let trainer = Trainer::new();
        let config = TrainingConfig { epochs: 2, ..Default::default() };
        let prepared = trainer.prepare(&blob_partition(30, 0), &layers(), &config).unwrap();
        let model = trainer.run(prepared, None, &CancelFlag::new()).await.unwrap();
        assert!(model.history().val_loss().is_empty());
        assert_eq!(model.history().train_loss().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_history() {
        let trainer = Trainer::new();
        let config = TrainingConfig { epochs: 20, ..Default::default() };
        let prepared = trainer.prepare(&blob_partition(30, 6), &layers(), &config).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();
        let watcher = cancel.clone();
        let run = trainer.run(prepared, Some(&tx), &cancel);
        let stop = async move {
            if let Some(snapshot) = rx.recv().await {
                assert_eq!(snapshot.epoch, 1);
                watcher.cancel();
            }
        };
        let (outcome, ()) = tokio::join!(run, stop);
        let failure = outcome.unwrap_err();
        assert!(matches!(failure.error, LabError::Cancelled { .. }));
        assert!(!failure.history.is_empty());
        assert!(failure.history.len() < 20);
        assert_eq!(trainer.state(), TrainerState::Failed);
    }

    #[tokio::test]
    async fn overlapping_runs_are_rejected() {
        let trainer = Trainer::new();
        let partition = blob_partition(30, 6);
        let config = TrainingConfig { epochs: 3, ..Default::default() };
        let first = trainer.prepare(&partition, &layers(), &config).unwrap();
        let second = trainer.prepare(&partition, &layers(), &config).unwrap();
        let cancel = CancelFlag::new();
        let (a, b) = tokio::join!(
            trainer.run(first, None, &cancel),
            trainer.run(second, None, &cancel)
        );
        assert!(a.is_ok());
        assert!(matches!(b.unwrap_err().error, LabError::RunInProgress));
        assert_eq!(trainer.state(), TrainerState::Completed);
    }

    #[test]
    fn construction_failure_marks_the_trainer_failed() {
        let mut partition = blob_partition(6, 0);
        for sample in &mut partition.train {
            sample.features.clear();
        }
        let trainer = Trainer::new();
        let err = trainer
            .prepare(&partition, &layers(), &TrainingConfig::default())
            .unwrap_err();
        assert!(matches!(err, LabError::TrainingFailure(_)));
        assert_eq!(trainer.state(), TrainerState::Failed);
    }

    #[test]
    fn configuration_errors_surface_before_running() {
        let trainer = Trainer::new();
        let empty = blob_partition(0, 5);
        assert!(matches!(
            trainer.prepare(&empty, &layers(), &TrainingConfig::default()),
            Err(LabError::InvalidConfiguration(_))
        ));
        let bad = TrainingConfig { epochs: 0, ..Default::default() };
        assert!(trainer.prepare(&blob_partition(10, 0), &layers(), &bad).is_err());
        let bad = TrainingConfig { learning_rate: f64::NAN, ..Default::default() };
        assert!(trainer.prepare(&blob_partition(10, 0), &layers(), &bad).is_err());
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[tokio::test]
    async fn non_finite_values_fail_the_run() {
        let trainer = Trainer::new();
        let mut partition = blob_partition(30, 0);
        partition.train[0].features = vec![f64::MAX; 4];
        partition.train[1].features = vec![f64::MAX; 4];
        let config = TrainingConfig { epochs: 5, ..Default::default() };
        let prepared = trainer.prepare(&partition, &layers(), &config).unwrap();
        let failure = trainer.run(prepared, None, &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(failure.error, LabError::TrainingFailure(_)));
        assert!(failure.history.is_empty());
        assert_eq!(trainer.state(), TrainerState::Failed);
    }

    #[test]
    fn stats_come_from_training_split_only() {
        let trainer = Trainer::new();
        let mut partition = blob_partition(30, 10);
        for s in &mut partition.validation {
            s.features = vec![1000.0; 4];
        }
        let prepared = trainer.prepare(&partition, &layers(), &TrainingConfig::default()).unwrap();
        let expected = FeatureStats::fit(&features_of(&partition.train)).unwrap();
        assert_eq!(prepared.stats(), &expected);
    }
}
