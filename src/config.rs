//! Lab configuration and per-dataset defaults.
use crate::activations::ActivationKind;
use crate::boundary::{DEFAULT_DISTANCE_EPSILON, DEFAULT_NEIGHBORS, DEFAULT_RESOLUTION};
use crate::error::{LabError, Result};
use crate::metrics::DEFAULT_PREVIEW;
use crate::network::LayerSpec;
use crate::split::{SplitPercentages, DEFAULT_MIN_SPLIT};
use crate::trainer::{TrainingConfig, MAX_EPOCHS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which bundled dataset a lab is set up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetVariant {
    /// Iris flowers with a known PCA projection.
    Flowers,
    /// Synthetic galaxy spirals; plane coordinates have no linear inverse.
    Galaxies,
}

impl DatasetVariant {
    pub fn defaults(self) -> LabConfig {
        match self {
            DatasetVariant::Flowers => LabConfig {
                variant: self,
                epochs: 30,
                learning_rate: 0.01,
                train_percent: 60,
                val_percent: 20,
                seed: 42,
                default_layer: LayerTemplate {
                    units: 8,
                    activation: ActivationKind::Relu,
                    dropout: 0.0,
                    batch_norm: false,
                },
                added_layer_units: 6,
                ..LabConfig::base(self)
            },
            DatasetVariant::Galaxies => LabConfig {
                variant: self,
                epochs: 18,
                learning_rate: 0.005,
                train_percent: 70,
                val_percent: 15,
                seed: 1337,
                default_layer: LayerTemplate {
                    units: 10,
                    activation: ActivationKind::Relu,
                    dropout: 0.1,
                    batch_norm: false,
                },
                added_layer_units: 8,
                ..LabConfig::base(self)
            },
        }
    }
}

impl fmt::Display for DatasetVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DatasetVariant::Flowers => "flowers",
            DatasetVariant::Galaxies => "galaxies",
        })
    }
}

/// Layer shape used when seeding or extending a layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerTemplate {
    pub units: usize,
    pub activation: ActivationKind,
    #[serde(default)]
    pub dropout: f64,
    #[serde(default)]
    pub batch_norm: bool,
}

impl LayerTemplate {
    /// A fresh spec with a new id.
    pub fn spec(&self) -> LayerSpec {
        LayerSpec::new(self.units, self.activation)
            .with_dropout(self.dropout)
            .with_batch_norm(self.batch_norm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabConfig {
    pub variant: DatasetVariant,
    pub epochs: usize,
    pub min_epochs: usize,
    pub max_epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub train_percent: u32,
    pub val_percent: u32,
    pub split_floor: u32,
    pub seed: u64,
    pub default_layer: LayerTemplate,
    pub added_layer_units: usize,
    pub grid_resolution: usize,
    pub neighbors: usize,
    pub neighbor_epsilon: f64,
    pub preview_count: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        DatasetVariant::Flowers.defaults()
    }
}

impl LabConfig {
    fn base(variant: DatasetVariant) -> Self {
        Self {
            variant,
            epochs: 30,
            min_epochs: 5,
            max_epochs: 30,
            learning_rate: 0.01,
            batch_size: 32,
            train_percent: 60,
            val_percent: 20,
            split_floor: DEFAULT_MIN_SPLIT,
            seed: 42,
            default_layer: LayerTemplate {
                units: 8,
                activation: ActivationKind::Relu,
                dropout: 0.0,
                batch_norm: false,
            },
            added_layer_units: 6,
            grid_resolution: DEFAULT_RESOLUTION,
            neighbors: DEFAULT_NEIGHBORS,
            neighbor_epsilon: DEFAULT_DISTANCE_EPSILON,
            preview_count: DEFAULT_PREVIEW,
        }
    }

    /// Parse a JSON document; missing keys take the flowers defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the keys present in `json` on top of `self`; absent keys keep
    /// their current values.
    pub fn overlay_json(self, json: &str) -> Result<Self> {
        let mut merged = serde_json::to_value(&self)?;
        let overrides: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Object(overrides) = overrides else {
            return Err(LabError::InvalidConfiguration("lab config must be a JSON object".into()));
        };
        if let serde_json::Value::Object(base) = &mut merged {
            base.extend(overrides);
        }
        let config: Self = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_epochs == 0 || self.min_epochs > self.max_epochs || self.max_epochs > MAX_EPOCHS {
            return Err(LabError::InvalidConfiguration(format!(
                "epoch bounds {}..={} must lie within 1..={MAX_EPOCHS}",
                self.min_epochs, self.max_epochs
            )));
        }
        if self.added_layer_units == 0 {
            return Err(LabError::InvalidConfiguration("added layers need at least one unit".into()));
        }
        if self.neighbors == 0 || !(self.neighbor_epsilon.is_finite() && self.neighbor_epsilon > 0.0) {
            return Err(LabError::InvalidConfiguration(
                "neighbor interpolation needs k > 0 and a positive epsilon".into(),
            ));
        }
        self.default_layer.spec().validate()?;
        self.split()?;
        self.training().validate()
    }

    pub fn clamp_epochs(&self, epochs: usize) -> usize {
        epochs.clamp(self.min_epochs, self.max_epochs)
    }

    pub fn split(&self) -> Result<SplitPercentages> {
        SplitPercentages::new(self.train_percent, self.val_percent, self.split_floor)
    }

    pub fn training(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.clamp_epochs(self.epochs),
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed: self.seed,
        }
    }
}
