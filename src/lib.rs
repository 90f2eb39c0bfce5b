//! A small crate for training feed-forward classifiers on 2-D-plottable
//! datasets and inspecting what they learned.
//!
//! - Seeded, platform-independent shuffling and train/validation/test splits
//! - Feature standardization fitted on the training split only
//! - Dense / batch-norm / dropout stacks trained with Adam on cross-entropy
//! - Async training runs with per-epoch metrics and cooperative cancellation
//! - Test-set evaluation and decision-boundary rasterization on the plane
//! - Iris (JSON/CSV) and synthetic galaxy datasets

pub mod activations;
pub mod boundary;
pub mod config;
pub mod datasets;
pub mod error;
pub mod lab;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod network;
pub mod optim;
pub mod projection;
pub mod rng;
pub mod split;
pub mod standardize;
pub mod trainer;
pub mod utils;

pub use activations::{Activation, ActivationKind};
pub use boundary::{rasterize, BoundingBox, DecisionGrid, InverseMapping, LinearInverse, NeighborInterpolation};
pub use config::{DatasetVariant, LabConfig};
pub use datasets::{generate_galaxies, load_flowers_csv, load_flowers_json, load_galaxies_json, ClassLabel, Dataset, GalaxyClass, Sample, Species};
pub use error::{LabError, LabWarning, Result};
pub use lab::{hints, Lab, LabResults, ModelHint};
pub use metrics::{evaluate, ConfusionMatrix, EvaluationResult, SamplePrediction};
pub use network::{Classifier, LayerId, LayerPatch, LayerSpec, LayerStack, NetworkBuilder};
pub use projection::LinearProjection;
pub use rng::{seed_shuffle, SequenceGenerator};
pub use split::{partition, Partition, Split, SplitPercentages, SplitShare, SplitSummary};
pub use standardize::FeatureStats;
pub use trainer::{CancelFlag, MetricsHistory, MetricsSnapshot, RunFailure, TrainedModel, Trainer, TrainerState, TrainingConfig};
pub use utils::{confusion_table, evaluation_report, history_table};
