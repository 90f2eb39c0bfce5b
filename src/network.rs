//! Layer configuration, the network builder and the trained classifier.
use crate::activations::ActivationKind;
use crate::error::{LabError, Result};
use crate::layers::{ActivationStage, BatchNorm, DenseLayer, Dropout, Matrix, Stage};
use crate::loss::{batch_cross_entropy, batch_cross_entropy_deriv};
use crate::optim::Adam;
use crate::rng::SequenceGenerator;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identity of a configured layer, independent of its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One user-configured hidden layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    #[serde(default)]
    pub id: LayerId,
    pub units: usize,
    pub activation: ActivationKind,
    #[serde(default)]
    pub dropout: f64,
    #[serde(default)]
    pub batch_norm: bool,
}

impl LayerSpec {
    pub fn new(units: usize, activation: ActivationKind) -> Self {
        Self {
            id: LayerId::new(),
            units,
            activation,
            dropout: 0.0,
            batch_norm: false,
        }
    }

    pub fn with_dropout(mut self, rate: f64) -> Self {
        self.dropout = rate;
        self
    }

    pub fn with_batch_norm(mut self, enabled: bool) -> Self {
        self.batch_norm = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.units == 0 {
            return Err(LabError::InvalidConfiguration(format!("layer {} has zero units", self.id)));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(LabError::InvalidConfiguration(format!(
                "layer {} dropout {} is outside [0, 1)",
                self.id, self.dropout
            )));
        }
        Ok(())
    }
}

/// Partial update for a layer; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerPatch {
    pub units: Option<usize>,
    pub activation: Option<ActivationKind>,
    pub dropout: Option<f64>,
    pub batch_norm: Option<bool>,
}

/// Ordered, id-keyed list of hidden layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerStack {
    layers: Vec<LayerSpec>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: Vec<LayerSpec>) -> Result<Self> {
        let mut stack = Self::new();
        for spec in specs {
            stack.push(spec)?;
        }
        Ok(stack)
    }

    /// Append a layer. Duplicate ids and invalid values are rejected.
    pub fn push(&mut self, spec: LayerSpec) -> Result<LayerId> {
        spec.validate()?;
        if self.position(spec.id).is_some() {
            return Err(LabError::InvalidConfiguration(format!("duplicate layer id {}", spec.id)));
        }
        let id = spec.id;
        self.layers.push(spec);
        Ok(id)
    }

    pub fn get(&self, id: LayerId) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn position(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Apply `patch` to the layer `id`; the layer is untouched if the result
    /// would be invalid.
    pub fn update(&mut self, id: LayerId, patch: LayerPatch) -> Result<()> {
        let index = self
            .position(id)
            .ok_or_else(|| LabError::InvalidConfiguration(format!("unknown layer id {id}")))?;
        let mut next = self.layers[index].clone();
        if let Some(units) = patch.units {
            next.units = units;
        }
        if let Some(activation) = patch.activation {
            next.activation = activation;
        }
        if let Some(dropout) = patch.dropout {
            next.dropout = dropout;
        }
        if let Some(batch_norm) = patch.batch_norm {
            next.batch_norm = batch_norm;
        }
        next.validate()?;
        self.layers[index] = next;
        Ok(())
    }

    pub fn remove(&mut self, id: LayerId) -> Option<LayerSpec> {
        self.position(id).map(|index| self.layers.remove(index))
    }

    /// Move `active` to where `over` currently sits (drag-and-drop semantics).
    /// Returns false if either id is unknown or they are the same layer.
    pub fn move_layer(&mut self, active: LayerId, over: LayerId) -> bool {
        match (self.position(active), self.position(over)) {
            (Some(from), Some(to)) if from != to => {
                let spec = self.layers.remove(from);
                self.layers.insert(to, spec);
                true
            }
            _ => false,
        }
    }

    pub fn specs(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// Read-only copy handed to a training run.
    pub fn snapshot(&self) -> Vec<LayerSpec> {
        self.layers.clone()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Translates layer specs into a sequential classifier.
#[derive(Debug, Clone, Copy)]
pub struct NetworkBuilder {
    input_size: usize,
    num_classes: usize,
}

impl NetworkBuilder {
    pub fn new(input_size: usize, num_classes: usize) -> Self {
        Self { input_size, num_classes }
    }

    /// Dense → [BatchNorm] → activation → [Dropout] per spec, then the
    /// implicit Dense(classes) → softmax output.
    ///
    /// Softmax on a hidden layer is accepted here.
    pub fn build(&self, specs: &[LayerSpec], rng: &mut SequenceGenerator) -> Result<Classifier> {
        if self.input_size == 0 {
            return Err(LabError::TrainingFailure("network input width is zero".into()));
        }
        if self.num_classes == 0 {
            return Err(LabError::TrainingFailure("network needs at least one class".into()));
        }
        let mut stages = Vec::with_capacity(specs.len() * 4 + 2);
        let mut width = self.input_size;
        for spec in specs {
            spec.validate()?;
            stages.push(Stage::Dense(DenseLayer::new(width, spec.units, rng)));
            if spec.batch_norm {
                stages.push(Stage::BatchNorm(BatchNorm::new(spec.units)));
            }
            stages.push(Stage::Activation(ActivationStage::new(spec.activation)));
            if spec.dropout > 0.0 {
                stages.push(Stage::Dropout(Dropout::new(spec.dropout)));
            }
            width = spec.units;
        }
        stages.push(Stage::Dense(DenseLayer::new(width, self.num_classes, rng)));
        stages.push(Stage::Activation(ActivationStage::new(ActivationKind::Softmax)));

        let out = stages.iter().fold(self.input_size, |w, s| s.output_width(w));
        if out != self.num_classes {
            return Err(LabError::TrainingFailure(format!(
                "network output width {out} does not match {} classes",
                self.num_classes
            )));
        }
        Ok(Classifier {
            stages,
            input_size: self.input_size,
            num_classes: self.num_classes,
        })
    }
}

/// Loss and correct-count of one optimization step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchOutcome {
    pub loss: f64,
    pub correct: usize,
    pub size: usize,
}

/// A sequential softmax classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    stages: Vec<Stage>,
    input_size: usize,
    num_classes: usize,
}

/// Index of the largest value (first one on ties).
pub fn argmax(row: &[f64]) -> usize {
    row.iter()
        .enumerate()
        .fold(0usize, |max_i, (i, &v)| if v > row[max_i] { i } else { max_i })
}

impl Classifier {
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn check_width(&self, inputs: &Matrix) -> Result<()> {
        match inputs.iter().find(|r| r.len() != self.input_size) {
            Some(row) => Err(LabError::TrainingFailure(format!(
                "input row has {} features, network expects {}",
                row.len(),
                self.input_size
            ))),
            None => Ok(()),
        }
    }

    /// Class probabilities for a batch (inference mode).
    pub fn predict_proba(&self, inputs: &Matrix) -> Result<Matrix> {
        self.check_width(inputs)?;
        Ok(self.stages.iter().fold(inputs.clone(), |x, stage| stage.forward(&x)))
    }

    /// Arg-max class per row.
    pub fn predict_classes(&self, inputs: &Matrix) -> Result<Vec<usize>> {
        Ok(self.predict_proba(inputs)?.iter().map(|p| argmax(p)).collect())
    }

    pub fn predict_row(&self, row: &[f64]) -> Result<usize> {
        Ok(self.predict_classes(&vec![row.to_vec()])?[0])
    }

    /// Mean loss and accuracy of a labeled batch without updating anything.
    pub fn score(&self, inputs: &Matrix, targets: &Matrix) -> Result<(f64, f64)> {
        let probs = self.predict_proba(inputs)?;
        let loss = batch_cross_entropy(&probs, targets)?;
        Ok((loss, count_correct(&probs, targets) as f64 / inputs.len().max(1) as f64))
    }

    /// One forward/backward pass on a mini-batch followed by an optimizer step.
    pub fn train_batch(
        &mut self,
        inputs: &Matrix,
        targets: &Matrix,
        optimizer: &mut Adam,
        rng: &mut SequenceGenerator,
    ) -> Result<BatchOutcome> {
        self.check_width(inputs)?;
        let mut x = inputs.clone();
        for stage in self.stages.iter_mut() {
            x = stage.forward_train(&x, rng);
        }
        let loss = batch_cross_entropy(&x, targets)?;
        let correct = count_correct(&x, targets);
        // Softmax and cross-entropy fold into (p - y) at the logits, so the
        // final activation stage is skipped on the way back.
        let mut grad = batch_cross_entropy_deriv(&x, targets)?;
        let hidden = self.stages.len().saturating_sub(1);
        for stage in self.stages[..hidden].iter_mut().rev() {
            grad = stage.backward(&grad);
        }
        optimizer.step(&mut self.stages);
        Ok(BatchOutcome {
            loss,
            correct,
            size: inputs.len(),
        })
    }

    /// True when every trainable value is finite.
    pub fn is_finite(&mut self) -> bool {
        let mut finite = true;
        for stage in self.stages.iter_mut() {
            stage.visit_params(&mut |params: &mut [f64], _grads: &[f64]| {
                finite &= params.iter().all(|v| v.is_finite());
            });
        }
        finite
    }

    /// Layer widths from input to output, e.g. `[4, 8, 3]`.
    pub fn widths(&self) -> Vec<usize> {
        let mut sizes = vec![self.input_size];
        sizes.extend(self.stages.iter().filter_map(|s| match s {
            Stage::Dense(layer) => Some(layer.output_size),
            _ => None,
        }));
        sizes
    }
}

fn count_correct(probs: &Matrix, targets: &Matrix) -> usize {
    probs
        .iter()
        .zip(targets)
        .filter(|(p, t)| argmax(p) == argmax(t))
        .count()
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Classifier: {:?}", self.widths())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels_of(stages: &[Stage]) -> Vec<String> {
        stages.iter().map(Stage::label).collect()
    }

    #[test]
    fn builds_stages_in_order_with_implicit_output() {
        let specs = vec![
            LayerSpec::new(8, ActivationKind::Relu).with_batch_norm(true).with_dropout(0.2),
            LayerSpec::new(5, ActivationKind::Tanh),
        ];
        let net = NetworkBuilder::new(4, 3)
            .build(&specs, &mut SequenceGenerator::new(1))
            .unwrap();
        assert_eq!(
            labels_of(net.stages()),
            vec![
                "dense(4→8)",
                "batch_norm(8)",
                "relu",
                "dropout(0.2)",
                "dense(8→5)",
                "tanh",
                "dense(5→3)",
                "softmax"
            ]
        );
        assert_eq!(net.to_string(), "Classifier: [4, 8, 5, 3]");
    }

    #[test]
    fn zero_layers_is_softmax_regression() {
        let net = NetworkBuilder::new(4, 3).build(&[], &mut SequenceGenerator::new(1)).unwrap();
        assert_eq!(net.widths(), vec![4, 3]);
        let p = net.predict_proba(&vec![vec![0.1, 0.2, 0.3, 0.4]]).unwrap();
        assert!((p[0].iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn interior_softmax_is_allowed() {
        let specs = vec![LayerSpec::new(4, ActivationKind::Softmax), LayerSpec::new(4, ActivationKind::Relu)];
        assert!(NetworkBuilder::new(2, 3).build(&specs, &mut SequenceGenerator::new(1)).is_ok());
    }

    #[test]
    fn construction_errors_are_reported() {
        let bad = vec![LayerSpec::new(0, ActivationKind::Relu)];
        assert!(matches!(
            NetworkBuilder::new(4, 3).build(&bad, &mut SequenceGenerator::new(1)),
            Err(LabError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            NetworkBuilder::new(0, 3).build(&[], &mut SequenceGenerator::new(1)),
            Err(LabError::TrainingFailure(_))
        ));
    }

    #[test]
    fn wrong_input_width_is_a_training_failure() {
        let net = NetworkBuilder::new(4, 3).build(&[], &mut SequenceGenerator::new(1)).unwrap();
        assert!(matches!(net.predict_proba(&vec![vec![1.0]]), Err(LabError::TrainingFailure(_))));
    }

    #[test]
    fn training_reduces_loss_on_separable_data() {
        let specs = vec![LayerSpec::new(6, ActivationKind::Relu)];
        let mut rng = SequenceGenerator::new(11);
        let mut net = NetworkBuilder::new(2, 2).build(&specs, &mut rng).unwrap();
        let x: Matrix = (0..20)
            .map(|i| if i % 2 == 0 { vec![1.0, 1.0] } else { vec![-1.0, -1.0] })
            .collect();
        let y: Matrix = (0..20)
            .map(|i| if i % 2 == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect();
        let mut adam = Adam::default_params(0.05);
        let (before, _) = net.score(&x, &y).unwrap();
        for _ in 0..100 {
            net.train_batch(&x, &y, &mut adam, &mut rng).unwrap();
        }
        let (after, acc) = net.score(&x, &y).unwrap();
        assert!(after < before);
        assert_eq!(acc, 1.0);
        assert!(net.is_finite());
    }

    #[test]
    fn stack_is_keyed_by_id() {
        let mut stack = LayerStack::new();
        let a = stack.push(LayerSpec::new(8, ActivationKind::Relu)).unwrap();
        let b = stack.push(LayerSpec::new(6, ActivationKind::Sigmoid)).unwrap();
        let c = stack.push(LayerSpec::new(4, ActivationKind::Tanh)).unwrap();

        assert!(stack.move_layer(c, a));
        let order: Vec<LayerId> = stack.specs().iter().map(|l| l.id).collect();
        assert_eq!(order, vec![c, a, b]);

        stack
            .update(a, LayerPatch { units: Some(12), ..Default::default() })
            .unwrap();
        assert_eq!(stack.get(a).map(|l| l.units), Some(12));
        assert!(stack
            .update(b, LayerPatch { dropout: Some(1.0), ..Default::default() })
            .is_err());
        assert_eq!(stack.get(b).map(|l| l.dropout), Some(0.0));

        assert!(stack.remove(c).is_some());
        assert!(!stack.move_layer(c, a));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn layer_specs_deserialize_from_front_end_shape() {
        let json = r#"{"units":8,"activation":"relu","dropout":0.1,"batchNorm":true}"#;
        let spec: LayerSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.units, 8);
        assert!(spec.batch_norm);
    }
}
