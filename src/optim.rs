//! Adam optimizer over the flat parameter buffers of a network.
use crate::layers::Stage;

/// Adam with bias-corrected first and second moments.
///
/// Moment buffers are created lazily, one per parameter buffer, in the order
/// the network visits them; that order is fixed for a given architecture.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: u64,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
}

impl Adam {
    pub fn new(lr: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// beta1 = 0.9, beta2 = 0.999, epsilon = 1e-7
    pub fn default_params(lr: f64) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-7)
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }

    /// Apply one update using the gradients currently stored in `stages`.
    pub fn step(&mut self, stages: &mut [Stage]) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);
        let (lr, beta1, beta2, epsilon) = (self.lr, self.beta1, self.beta2, self.epsilon);
        let (m_all, v_all) = (&mut self.m, &mut self.v);
        let mut slot = 0;
        for stage in stages.iter_mut() {
            stage.visit_params(&mut |params: &mut [f64], grads: &[f64]| {
                if m_all.len() <= slot {
                    m_all.push(vec![0.0; params.len()]);
                    v_all.push(vec![0.0; params.len()]);
                }
                let (m, v) = (&mut m_all[slot], &mut v_all[slot]);
                for i in 0..params.len() {
                    let g = grads[i];
                    m[i] = beta1 * m[i] + (1.0 - beta1) * g;
                    v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
                    let m_hat = m[i] / bias1;
                    let v_hat = v[i] / bias2;
                    params[i] -= lr * m_hat / (v_hat.sqrt() + epsilon);
                }
                slot += 1;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{DenseLayer, Matrix};
    use crate::rng::SequenceGenerator;
    use approx::assert_abs_diff_eq;

    #[test]
    fn first_step_moves_each_weight_by_lr() {
        let mut layer = DenseLayer::new(2, 1, &mut SequenceGenerator::new(2));
        layer.weights = vec![1.0, 1.0];
        layer.forward_train(&vec![vec![1.0, -1.0]]);
        layer.backward(&vec![vec![1.0]]);
        let mut stages = vec![Stage::Dense(layer)];
        let mut adam = Adam::default_params(0.1);
        adam.step(&mut stages);
        let Stage::Dense(layer) = &stages[0] else { unreachable!() };
        assert_abs_diff_eq!(layer.weights[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(layer.weights[1], 1.1, epsilon = 1e-6);
        assert_abs_diff_eq!(layer.bias[0], 0.01 - 0.1, epsilon = 1e-6);
        assert_eq!(adam.step_count(), 1);
    }

    #[test]
    fn minimizes_a_linear_regression() {
        let mut rng = SequenceGenerator::new(4);
        let mut stages = vec![Stage::Dense(DenseLayer::new(1, 1, &mut rng))];
        let mut adam = Adam::default_params(0.05);
        let x: Matrix = (0..8).map(|i| vec![i as f64 / 4.0]).collect();
        let y: Vec<f64> = x.iter().map(|r| 3.0 * r[0] - 1.0).collect();
        for _ in 0..2000 {
            let out = stages[0].forward_train(&x, &mut rng);
            let grad: Matrix = out
                .iter()
                .zip(&y)
                .map(|(o, t)| vec![2.0 * (o[0] - t) / x.len() as f64])
                .collect();
            stages[0].backward(&grad);
            adam.step(&mut stages);
        }
        let Stage::Dense(layer) = &stages[0] else { unreachable!() };
        assert_abs_diff_eq!(layer.weights[0], 3.0, epsilon = 5e-2);
        assert_abs_diff_eq!(layer.bias[0], -1.0, epsilon = 5e-2);
    }
}
