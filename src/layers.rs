//! Network stages: dense, batch normalization, dropout and activation.
//!
//! Every stage works on a batch (`Matrix`, one row per sample). The
//! `forward_train` path caches what `backward` needs; `forward` is the
//! read-only inference path.
use crate::activations::ActivationKind;
use crate::rng::SequenceGenerator;
use rand::Rng;

/// Matrix type: one row per sample
pub type Matrix = Vec<Vec<f64>>;

/// A fully-connected layer. Weights are row-major `[output][input]`.
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub input_size: usize,
    pub output_size: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
    grad_w: Vec<f64>,
    grad_b: Vec<f64>,
    input_cache: Matrix,
}

impl DenseLayer {
    /// He (Kaiming) uniform initialization and small positive bias.
    pub fn new(input_size: usize, output_size: usize, rng: &mut SequenceGenerator) -> Self {
        // He uniform: U(-sqrt(6/fan_in), sqrt(6/fan_in))
        let limit = (6.0f64 / (input_size.max(1) as f64)).sqrt();
        let weights = (0..input_size * output_size)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self {
            input_size,
            output_size,
            weights,
            bias: vec![0.01; output_size],
            grad_w: vec![0.0; input_size * output_size],
            grad_b: vec![0.0; output_size],
            input_cache: Vec::new(),
        }
    }

    fn forward_row(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .chunks(self.input_size.max(1))
            .zip(&self.bias)
            .map(|(row, &b)| row.iter().zip(input).map(|(&w, &i)| w * i).sum::<f64>() + b)
            .collect()
    }

    pub fn forward(&self, input: &Matrix) -> Matrix {
        input.iter().map(|row| self.forward_row(row)).collect()
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Matrix {
        let out = self.forward(input);
        self.input_cache = input.clone();
        out
    }

    /// Accumulate `dW = dZᵀ·X`, `db = Σ dZ` and return `dX = dZ·W`.
    pub fn backward(&mut self, grad_out: &Matrix) -> Matrix {
        self.grad_w.iter_mut().for_each(|g| *g = 0.0);
        self.grad_b.iter_mut().for_each(|g| *g = 0.0);
        let mut grad_in = vec![vec![0.0; self.input_size]; grad_out.len()];
        for ((dz, x), dx) in grad_out.iter().zip(&self.input_cache).zip(grad_in.iter_mut()) {
            for (o, &dz_o) in dz.iter().enumerate() {
                self.grad_b[o] += dz_o;
                let row = o * self.input_size;
                for i in 0..self.input_size {
                    self.grad_w[row + i] += dz_o * x[i];
                    dx[i] += dz_o * self.weights[row + i];
                }
            }
        }
        grad_in
    }

    fn visit_params(&mut self, f: &mut dyn FnMut(&mut [f64], &[f64])) {
        f(&mut self.weights, &self.grad_w);
        f(&mut self.bias, &self.grad_b);
    }
}

/// Per-feature batch normalization with learnable scale and shift.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    pub gamma: Vec<f64>,
    pub beta: Vec<f64>,
    pub running_mean: Vec<f64>,
    pub running_var: Vec<f64>,
    momentum: f64,
    epsilon: f64,
    grad_gamma: Vec<f64>,
    grad_beta: Vec<f64>,
    normalized_cache: Matrix,
    inv_std_cache: Vec<f64>,
}

impl BatchNorm {
    pub const MOMENTUM: f64 = 0.99;
    pub const EPSILON: f64 = 1e-3;

    pub fn new(width: usize) -> Self {
        Self {
            gamma: vec![1.0; width],
            beta: vec![0.0; width],
            running_mean: vec![0.0; width],
            running_var: vec![1.0; width],
            momentum: Self::MOMENTUM,
            epsilon: Self::EPSILON,
            grad_gamma: vec![0.0; width],
            grad_beta: vec![0.0; width],
            normalized_cache: Vec::new(),
            inv_std_cache: Vec::new(),
        }
    }

    fn width(&self) -> usize {
        self.gamma.len()
    }

    pub fn forward(&self, input: &Matrix) -> Matrix {
        input
            .iter()
            .map(|row| {
                (0..self.width())
                    .map(|j| {
                        let inv_std = 1.0 / (self.running_var[j] + self.epsilon).sqrt();
                        self.gamma[j] * (row[j] - self.running_mean[j]) * inv_std + self.beta[j]
                    })
                    .collect()
            })
            .collect()
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Matrix {
        let n = input.len().max(1) as f64;
        let width = self.width();
        let mut mean = vec![0.0; width];
        let mut var = vec![0.0; width];
        for row in input {
            for j in 0..width {
                mean[j] += row[j] / n;
            }
        }
        for row in input {
            for j in 0..width {
                var[j] += (row[j] - mean[j]).powi(2) / n;
            }
        }
        self.inv_std_cache = var.iter().map(|v| 1.0 / (v + self.epsilon).sqrt()).collect();
        self.normalized_cache = input
            .iter()
            .map(|row| (0..width).map(|j| (row[j] - mean[j]) * self.inv_std_cache[j]).collect())
            .collect();
        for j in 0..width {
            self.running_mean[j] = self.momentum * self.running_mean[j] + (1.0 - self.momentum) * mean[j];
            self.running_var[j] = self.momentum * self.running_var[j] + (1.0 - self.momentum) * var[j];
        }
        self.normalized_cache
            .iter()
            .map(|row| (0..width).map(|j| self.gamma[j] * row[j] + self.beta[j]).collect())
            .collect()
    }

    pub fn backward(&mut self, grad_out: &Matrix) -> Matrix {
        let n = grad_out.len().max(1) as f64;
        let width = self.width();
        let mut sum_dxhat = vec![0.0; width];
        let mut sum_dxhat_xhat = vec![0.0; width];
        self.grad_gamma.iter_mut().for_each(|g| *g = 0.0);
        self.grad_beta.iter_mut().for_each(|g| *g = 0.0);
        for (dy, xhat) in grad_out.iter().zip(&self.normalized_cache) {
            for j in 0..width {
                self.grad_gamma[j] += dy[j] * xhat[j];
                self.grad_beta[j] += dy[j];
                let dxhat = dy[j] * self.gamma[j];
                sum_dxhat[j] += dxhat;
                sum_dxhat_xhat[j] += dxhat * xhat[j];
            }
        }
        grad_out
            .iter()
            .zip(&self.normalized_cache)
            .map(|(dy, xhat)| {
                (0..width)
                    .map(|j| {
                        let dxhat = dy[j] * self.gamma[j];
                        self.inv_std_cache[j] / n * (n * dxhat - sum_dxhat[j] - xhat[j] * sum_dxhat_xhat[j])
                    })
                    .collect()
            })
            .collect()
    }

    fn visit_params(&mut self, f: &mut dyn FnMut(&mut [f64], &[f64])) {
        f(&mut self.gamma, &self.grad_gamma);
        f(&mut self.beta, &self.grad_beta);
    }
}

/// Inverted dropout: surviving units are scaled by `1 / (1 - rate)` while
/// training; inference is the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    pub rate: f64,
    mask_cache: Matrix,
}

impl Dropout {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            mask_cache: Vec::new(),
        }
    }

    pub fn forward_train(&mut self, input: &Matrix, rng: &mut SequenceGenerator) -> Matrix {
        let keep_scale = 1.0 / (1.0 - self.rate);
        self.mask_cache = input
            .iter()
            .map(|row| {
                row.iter()
                    .map(|_| if rng.next_f64() >= self.rate { keep_scale } else { 0.0 })
                    .collect()
            })
            .collect();
        input
            .iter()
            .zip(&self.mask_cache)
            .map(|(row, mask)| row.iter().zip(mask).map(|(x, m)| x * m).collect())
            .collect()
    }

    pub fn backward(&self, grad_out: &Matrix) -> Matrix {
        grad_out
            .iter()
            .zip(&self.mask_cache)
            .map(|(row, mask)| row.iter().zip(mask).map(|(g, m)| g * m).collect())
            .collect()
    }
}

/// An activation applied row by row, caching inputs and outputs for backprop.
#[derive(Debug, Clone)]
pub struct ActivationStage {
    pub kind: ActivationKind,
    input_cache: Matrix,
    output_cache: Matrix,
}

impl ActivationStage {
    pub fn new(kind: ActivationKind) -> Self {
        Self {
            kind,
            input_cache: Vec::new(),
            output_cache: Vec::new(),
        }
    }

    pub fn forward(&self, input: &Matrix) -> Matrix {
        input.iter().map(|row| self.kind.forward(row)).collect()
    }

    pub fn forward_train(&mut self, input: &Matrix) -> Matrix {
        let out = self.forward(input);
        self.input_cache = input.clone();
        self.output_cache = out.clone();
        out
    }

    pub fn backward(&self, grad_out: &Matrix) -> Matrix {
        grad_out
            .iter()
            .zip(self.input_cache.iter().zip(&self.output_cache))
            .map(|(g, (z, a))| self.kind.backward(z, a, g))
            .collect()
    }
}

/// One step of a sequential network.
#[derive(Debug, Clone)]
pub enum Stage {
    Dense(DenseLayer),
    BatchNorm(BatchNorm),
    Activation(ActivationStage),
    Dropout(Dropout),
}

impl Stage {
    pub fn forward(&self, input: &Matrix) -> Matrix {
        match self {
            Stage::Dense(layer) => layer.forward(input),
            Stage::BatchNorm(layer) => layer.forward(input),
            Stage::Activation(layer) => layer.forward(input),
            Stage::Dropout(_) => input.clone(),
        }
    }

    pub fn forward_train(&mut self, input: &Matrix, rng: &mut SequenceGenerator) -> Matrix {
        match self {
            Stage::Dense(layer) => layer.forward_train(input),
            Stage::BatchNorm(layer) => layer.forward_train(input),
            Stage::Activation(layer) => layer.forward_train(input),
            Stage::Dropout(layer) => layer.forward_train(input, rng),
        }
    }

    pub fn backward(&mut self, grad_out: &Matrix) -> Matrix {
        match self {
            Stage::Dense(layer) => layer.backward(grad_out),
            Stage::BatchNorm(layer) => layer.backward(grad_out),
            Stage::Activation(layer) => layer.backward(grad_out),
            Stage::Dropout(layer) => layer.backward(grad_out),
        }
    }

    /// Hand each (parameter, gradient) pair to `f` in a stable order.
    pub fn visit_params(&mut self, f: &mut dyn FnMut(&mut [f64], &[f64])) {
        match self {
            Stage::Dense(layer) => layer.visit_params(f),
            Stage::BatchNorm(layer) => layer.visit_params(f),
            Stage::Activation(_) | Stage::Dropout(_) => {}
        }
    }

    /// Output width given the input width.
    pub fn output_width(&self, input_width: usize) -> usize {
        match self {
            Stage::Dense(layer) => layer.output_size,
            _ => input_width,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Stage::Dense(layer) => format!("dense({}→{})", layer.input_size, layer.output_size),
            Stage::BatchNorm(layer) => format!("batch_norm({})", layer.width()),
            Stage::Activation(layer) => layer.kind.to_string(),
            Stage::Dropout(layer) => format!("dropout({})", layer.rate),
        }
    }
}
