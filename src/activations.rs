use serde::{Deserialize, Serialize};
use std::fmt;

/// Trait for elementwise activation functions.
pub trait Activation: fmt::Debug + Send + Sync {
    fn apply(&self, x: f64) -> f64;
    fn derivative(&self, x: f64) -> f64;
    fn apply_vec(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.apply(xi)).collect()
    }
}

/// ReLU: max(0, x)
#[derive(Debug, Clone, Default)]
pub struct ReLU;

impl Activation for ReLU {
    fn apply(&self, x: f64) -> f64 {
        x.max(0.0)
    }
    fn derivative(&self, x: f64) -> f64 {
        (x > 0.0) as u8 as f64
    }
}

/// Sigmoid: 1 / (1 + exp(-x))
#[derive(Debug, Clone, Default)]
pub struct Sigmoid;

impl Activation for Sigmoid {
    fn apply(&self, x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }
    fn derivative(&self, x: f64) -> f64 {
        let s = self.apply(x);
        s * (1.0 - s)
    }
}

/// Tanh: (exp(x) - exp(-x)) / (exp(x) + exp(-x))
#[derive(Debug, Clone, Default)]
pub struct Tanh;

impl Activation for Tanh {
    fn apply(&self, x: f64) -> f64 {
        x.tanh()
    }
    fn derivative(&self, x: f64) -> f64 {
        let t = self.apply(x);
        1.0 - t * t
    }
}

/// LeakyReLU: x if x > 0 else alpha * x
#[derive(Debug, Clone)]
pub struct LeakyReLU {
    pub alpha: f64,
}

impl Default for LeakyReLU {
    fn default() -> Self {
        LEAKY_RELU
    }
}

impl Activation for LeakyReLU {
    fn apply(&self, x: f64) -> f64 {
        if x > 0.0 { x } else { self.alpha * x }
    }
    fn derivative(&self, x: f64) -> f64 {
        if x > 0.0 { 1.0 } else { self.alpha }
    }
}

/// ELU: x if x > 0 else alpha*(exp(x)-1)
#[derive(Debug, Clone)]
pub struct ELU {
    pub alpha: f64,
}

impl Default for ELU {
    fn default() -> Self {
        ELU_UNIT
    }
}

impl Activation for ELU {
    fn apply(&self, x: f64) -> f64 {
        if x > 0.0 { x } else { self.alpha * (x.exp() - 1.0) }
    }
    fn derivative(&self, x: f64) -> f64 {
        if x > 0.0 { 1.0 } else { self.apply(x) + self.alpha }
    }
}

/// Swish (SiLU): x * sigmoid(beta * x)
#[derive(Debug, Clone)]
pub struct Swish {
    pub beta: f64,
}

impl Default for Swish {
    fn default() -> Self {
        SWISH
    }
}

impl Activation for Swish {
    fn apply(&self, x: f64) -> f64 {
        x * Sigmoid.apply(self.beta * x)
    }
    fn derivative(&self, x: f64) -> f64 {
        let s = Sigmoid.apply(self.beta * x);
        let ds = s * (1.0 - s) * self.beta;
        s + x * ds
    }
}

/// Linear: identity
#[derive(Debug, Clone, Default)]
pub struct Linear;

impl Activation for Linear {
    fn apply(&self, x: f64) -> f64 {
        x
    }
    fn derivative(&self, _x: f64) -> f64 {
        1.0
    }
}

/// Softmax (vector-only, so not an `Activation`)
#[derive(Debug, Clone, Default)]
pub struct Softmax;

impl Softmax {
    pub fn apply_vec(&self, x: &[f64]) -> Vec<f64> {
        if x.is_empty() {
            return Vec::new();
        }
        let max = x.iter().fold(f64::MIN, |a, &b| a.max(b));
        let exps: Vec<f64> = x.iter().map(|&xi| (xi - max).exp()).collect();
        let exp_sum: f64 = exps.iter().sum();
        if !exp_sum.is_finite() || exp_sum <= 0.0 {
            // Fallback to uniform distribution to avoid NaNs
            let n = x.len() as f64;
            return vec![1.0 / n; x.len()];
        }
        exps.into_iter().map(|e| e / exp_sum).collect()
    }

    /// Vector-Jacobian product: `dz_i = y_i * (g_i - Σ_j g_j y_j)`.
    pub fn backward_vec(&self, y: &[f64], grad: &[f64]) -> Vec<f64> {
        let weighted: f64 = y.iter().zip(grad).map(|(&yi, &gi)| yi * gi).sum();
        y.iter().zip(grad).map(|(&yi, &gi)| yi * (gi - weighted)).collect()
    }
}

const LEAKY_RELU: LeakyReLU = LeakyReLU { alpha: 0.01 };
const ELU_UNIT: ELU = ELU { alpha: 1.0 };
const SWISH: Swish = Swish { beta: 1.0 };

/// Activation tag a layer is configured with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu,
    Elu,
    Swish,
    Softmax,
    Linear,
}

impl ActivationKind {
    pub const ALL: [ActivationKind; 8] = [
        ActivationKind::Relu,
        ActivationKind::Sigmoid,
        ActivationKind::Tanh,
        ActivationKind::LeakyRelu,
        ActivationKind::Elu,
        ActivationKind::Swish,
        ActivationKind::Softmax,
        ActivationKind::Linear,
    ];

    /// The scalar function, or `None` for softmax.
    pub fn elementwise(self) -> Option<&'static dyn Activation> {
        match self {
            ActivationKind::Relu => Some(&ReLU),
            ActivationKind::Sigmoid => Some(&Sigmoid),
            ActivationKind::Tanh => Some(&Tanh),
            ActivationKind::LeakyRelu => Some(&LEAKY_RELU),
            ActivationKind::Elu => Some(&ELU_UNIT),
            ActivationKind::Swish => Some(&SWISH),
            ActivationKind::Linear => Some(&Linear),
            ActivationKind::Softmax => None,
        }
    }

    /// Activate one row of pre-activations.
    pub fn forward(self, z: &[f64]) -> Vec<f64> {
        match self.elementwise() {
            Some(act) => act.apply_vec(z),
            None => Softmax.apply_vec(z),
        }
    }

    /// Gradient w.r.t. pre-activations `z` given the layer output `a` and the
    /// upstream gradient.
    pub fn backward(self, z: &[f64], a: &[f64], grad: &[f64]) -> Vec<f64> {
        match self.elementwise() {
            Some(act) => grad
                .iter()
                .zip(z)
                .map(|(&g, &zi)| g * act.derivative(zi))
                .collect(),
            None => Softmax.backward_vec(a, grad),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ActivationKind::Relu => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::LeakyRelu => "leaky_relu",
            ActivationKind::Elu => "elu",
            ActivationKind::Swish => "swish",
            ActivationKind::Softmax => "softmax",
            ActivationKind::Linear => "linear",
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn softmax_sums_to_one_and_survives_large_inputs() {
        let y = Softmax.apply_vec(&[1000.0, 1001.0, 999.0]);
        assert_abs_diff_eq!(y.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(y[1] > y[0] && y[0] > y[2]);
    }

    #[test]
    fn softmax_backward_matches_finite_difference() {
        let z = [0.3, -1.2, 0.8];
        let grad = [0.5, -0.25, 1.0];
        let y = Softmax.apply_vec(&z);
        let analytic = ActivationKind::Softmax.backward(&z, &y, &grad);
        let h = 1e-6;
        for i in 0..3 {
            let mut zp = z;
            zp[i] += h;
            let mut zm = z;
            zm[i] -= h;
            let f = |v: &[f64]| Softmax.apply_vec(v).iter().zip(&grad).map(|(a, g)| a * g).sum::<f64>();
            let numeric = (f(&zp) - f(&zm)) / (2.0 * h);
            assert_abs_diff_eq!(analytic[i], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn elementwise_dispatch() {
        assert_eq!(ActivationKind::Relu.forward(&[-1.0, 2.0]), vec![0.0, 2.0]);
        assert_eq!(ActivationKind::Relu.backward(&[-1.0, 2.0], &[0.0, 2.0], &[3.0, 3.0]), vec![0.0, 3.0]);
        assert_abs_diff_eq!(ActivationKind::Sigmoid.forward(&[0.0])[0], 0.5);
        assert_eq!(ActivationKind::LeakyRelu.forward(&[-2.0]), vec![-0.02]);
    }

    #[test]
    fn tags_serialize_in_snake_case() {
        let json = serde_json::to_string(&ActivationKind::LeakyRelu).unwrap();
        assert_eq!(json, "\"leaky_relu\"");
        let kind: ActivationKind = serde_json::from_str("\"softmax\"").unwrap();
        assert_eq!(kind, ActivationKind::Softmax);
    }
}
