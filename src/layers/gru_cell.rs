use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::optimizers::Optimizer;
use crate::persistence::array2_serde;
use crate::utils::{glorot_limit, sigmoid, sum_columns};

/// Holds gradients for all GRU cell parameters during backpropagation
#[derive(Clone, Debug)]
pub struct GRUCellGradients {
    pub w_ir: Array2<f64>,
    pub w_hr: Array2<f64>,
    pub b_ir: Array2<f64>,
    pub b_hr: Array2<f64>,
    pub w_iz: Array2<f64>,
    pub w_hz: Array2<f64>,
    pub b_iz: Array2<f64>,
    pub b_hz: Array2<f64>,
    pub w_in: Array2<f64>,
    pub w_hn: Array2<f64>,
    pub b_in: Array2<f64>,
    pub b_hn: Array2<f64>,
}

impl GRUCellGradients {
    pub fn accumulate(&mut self, other: &GRUCellGradients) {
        for (total, step) in self.matrices_mut().into_iter().zip(other.matrices()) {
            *total += step;
        }
    }

    fn matrices(&self) -> Vec<&Array2<f64>> {
        vec![
            &self.w_ir, &self.w_hr, &self.b_ir, &self.b_hr,
            &self.w_iz, &self.w_hz, &self.b_iz, &self.b_hz,
            &self.w_in, &self.w_hn, &self.b_in, &self.b_hn,
        ]
    }

    pub fn matrices_mut(&mut self) -> Vec<&mut Array2<f64>> {
        vec![
            &mut self.w_ir,
            &mut self.w_hr,
            &mut self.b_ir,
            &mut self.b_hr,
            &mut self.w_iz,
            &mut self.w_hz,
            &mut self.b_iz,
            &mut self.b_hz,
            &mut self.w_in,
            &mut self.w_hn,
            &mut self.b_in,
            &mut self.b_hn,
        ]
    }
}

/// Caches intermediate values during forward pass for efficient backward computation
#[derive(Clone, Debug)]
pub struct GRUCellCache {
    pub input: Array2<f64>,
    pub hx: Array2<f64>,
    pub reset_gate: Array2<f64>,
    pub update_gate: Array2<f64>,
    pub new_gate: Array2<f64>,
    /// W_hn h_{t-1} + b_hn, before the reset gate is applied
    pub recurrent_new: Array2<f64>,
}

/// GRU cell using the reset-after formulation:
/// - r_t = σ(W_ir x_t + b_ir + W_hr h_{t-1} + b_hr)
/// - z_t = σ(W_iz x_t + b_iz + W_hz h_{t-1} + b_hz)
/// - n_t = tanh(W_in x_t + b_in + r_t ⊙ (W_hn h_{t-1} + b_hn))
/// - h_t = (1 - z_t) ⊙ h_{t-1} + z_t ⊙ n_t
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GRUCell {
    #[serde(with = "array2_serde")]
    pub w_ir: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub w_hr: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub b_ir: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub b_hr: Array2<f64>,

    #[serde(with = "array2_serde")]
    pub w_iz: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub w_hz: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub b_iz: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub b_hz: Array2<f64>,

    #[serde(with = "array2_serde")]
    pub w_in: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub w_hn: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub b_in: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub b_hn: Array2<f64>,

    pub input_size: usize,
    pub hidden_size: usize,
}

impl GRUCell {
    /// Creates new GRU cell with Glorot-uniform weights and zero biases
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let input_limit = glorot_limit(input_size, 3 * hidden_size);
        let recurrent_limit = glorot_limit(hidden_size, 3 * hidden_size);
        let input_dist = || Uniform::new(-input_limit, input_limit);
        let recurrent_dist = || Uniform::new(-recurrent_limit, recurrent_limit);

        let w_ir = Array2::random_using((hidden_size, input_size), input_dist(), rng);
        let w_hr = Array2::random_using((hidden_size, hidden_size), recurrent_dist(), rng);
        let w_iz = Array2::random_using((hidden_size, input_size), input_dist(), rng);
        let w_hz = Array2::random_using((hidden_size, hidden_size), recurrent_dist(), rng);
        let w_in = Array2::random_using((hidden_size, input_size), input_dist(), rng);
        let w_hn = Array2::random_using((hidden_size, hidden_size), recurrent_dist(), rng);

        let zeros = || Array2::zeros((hidden_size, 1));

        GRUCell {
            w_ir, w_hr, b_ir: zeros(), b_hr: zeros(),
            w_iz, w_hz, b_iz: zeros(), b_hz: zeros(),
            w_in, w_hn, b_in: zeros(), b_hn: zeros(),
            input_size,
            hidden_size,
        }
    }

    pub fn forward(&self, input: &Array2<f64>, hx: &Array2<f64>) -> Array2<f64> {
        let (hy, _) = self.forward_with_cache(input, hx);
        hy
    }

    pub fn forward_with_cache(
        &self,
        input: &Array2<f64>,
        hx: &Array2<f64>,
    ) -> (Array2<f64>, GRUCellCache) {
        let reset_gate = (self.w_ir.dot(input) + &self.b_ir + self.w_hr.dot(hx) + &self.b_hr)
            .map(|&x| sigmoid(x));
        let update_gate = (self.w_iz.dot(input) + &self.b_iz + self.w_hz.dot(hx) + &self.b_hz)
            .map(|&x| sigmoid(x));

        let recurrent_new = self.w_hn.dot(hx) + &self.b_hn;
        let new_gate = (self.w_in.dot(input) + &self.b_in + &reset_gate * &recurrent_new)
            .map(|&x| x.tanh());

        let hy = &update_gate.map(|&z| 1.0 - z) * hx + &update_gate * &new_gate;

        let cache = GRUCellCache {
            input: input.clone(),
            hx: hx.clone(),
            reset_gate,
            update_gate,
            new_gate,
            recurrent_new,
        };

        (hy, cache)
    }

    /// Backward pass for one timestep.
    ///
    /// Returns (parameter_gradients, input_gradient, hidden_gradient)
    pub fn backward(
        &self,
        dhy: &Array2<f64>,
        cache: &GRUCellCache,
    ) -> (GRUCellGradients, Array2<f64>, Array2<f64>) {
        let z = &cache.update_gate;
        let r = &cache.reset_gate;
        let n = &cache.new_gate;

        // h_t = (1 - z_t) ⊙ h_{t-1} + z_t ⊙ n_t
        let d_update = dhy * &(n - &cache.hx);
        let d_new = dhy * z;
        let dhx_direct = dhy * &z.map(|&x| 1.0 - x);

        let d_new_raw = &d_new * &n.map(|&x| 1.0 - x * x);
        let d_reset = &d_new_raw * &cache.recurrent_new;
        let d_recurrent_new = &d_new_raw * r;

        let d_reset_raw = &d_reset * r * &r.map(|&x| 1.0 - x);
        let d_update_raw = &d_update * z * &z.map(|&x| 1.0 - x);

        let gradients = GRUCellGradients {
            w_ir: d_reset_raw.dot(&cache.input.t()),
            w_hr: d_reset_raw.dot(&cache.hx.t()),
            b_ir: sum_columns(&d_reset_raw),
            b_hr: sum_columns(&d_reset_raw),
            w_iz: d_update_raw.dot(&cache.input.t()),
            w_hz: d_update_raw.dot(&cache.hx.t()),
            b_iz: sum_columns(&d_update_raw),
            b_hz: sum_columns(&d_update_raw),
            w_in: d_new_raw.dot(&cache.input.t()),
            w_hn: d_recurrent_new.dot(&cache.hx.t()),
            b_in: sum_columns(&d_new_raw),
            b_hn: sum_columns(&d_recurrent_new),
        };

        let dx = self.w_ir.t().dot(&d_reset_raw)
            + self.w_iz.t().dot(&d_update_raw)
            + self.w_in.t().dot(&d_new_raw);

        let dhx = dhx_direct
            + self.w_hr.t().dot(&d_reset_raw)
            + self.w_hz.t().dot(&d_update_raw)
            + self.w_hn.t().dot(&d_recurrent_new);

        (gradients, dx, dhx)
    }

    /// Initialize zero gradients for accumulation
    pub fn zero_gradients(&self) -> GRUCellGradients {
        GRUCellGradients {
            w_ir: Array2::zeros(self.w_ir.raw_dim()),
            w_hr: Array2::zeros(self.w_hr.raw_dim()),
            b_ir: Array2::zeros(self.b_ir.raw_dim()),
            b_hr: Array2::zeros(self.b_hr.raw_dim()),
            w_iz: Array2::zeros(self.w_iz.raw_dim()),
            w_hz: Array2::zeros(self.w_hz.raw_dim()),
            b_iz: Array2::zeros(self.b_iz.raw_dim()),
            b_hz: Array2::zeros(self.b_hz.raw_dim()),
            w_in: Array2::zeros(self.w_in.raw_dim()),
            w_hn: Array2::zeros(self.w_hn.raw_dim()),
            b_in: Array2::zeros(self.b_in.raw_dim()),
            b_hn: Array2::zeros(self.b_hn.raw_dim()),
        }
    }

    /// Apply gradients using the provided optimizer
    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &GRUCellGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        optimizer.update(&format!("{}_w_ir", prefix), &mut self.w_ir, &gradients.w_ir);
        optimizer.update(&format!("{}_w_hr", prefix), &mut self.w_hr, &gradients.w_hr);
        optimizer.update(&format!("{}_b_ir", prefix), &mut self.b_ir, &gradients.b_ir);
        optimizer.update(&format!("{}_b_hr", prefix), &mut self.b_hr, &gradients.b_hr);
        optimizer.update(&format!("{}_w_iz", prefix), &mut self.w_iz, &gradients.w_iz);
        optimizer.update(&format!("{}_w_hz", prefix), &mut self.w_hz, &gradients.w_hz);
        optimizer.update(&format!("{}_b_iz", prefix), &mut self.b_iz, &gradients.b_iz);
        optimizer.update(&format!("{}_b_hz", prefix), &mut self.b_hz, &gradients.b_hz);
        optimizer.update(&format!("{}_w_in", prefix), &mut self.w_in, &gradients.w_in);
        optimizer.update(&format!("{}_w_hn", prefix), &mut self.w_hn, &gradients.w_hn);
        optimizer.update(&format!("{}_b_in", prefix), &mut self.b_in, &gradients.b_in);
        optimizer.update(&format!("{}_b_hn", prefix), &mut self.b_hn, &gradients.b_hn);
    }

    pub fn num_parameters(&self) -> usize {
        3 * (self.hidden_size * (self.input_size + self.hidden_size) + 2 * self.hidden_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gru_cell_forward() {
        let mut rng = StdRng::seed_from_u64(2);
        let cell = GRUCell::new(3, 2, &mut rng);

        let input = arr2(&[[0.5], [0.1], [-0.3]]);
        let hx = arr2(&[[0.1], [0.2]]);

        let hy = cell.forward(&input, &hx);

        assert_eq!(hy.shape(), &[2, 1]);
    }

    #[test]
    fn test_gru_backward_pass() {
        let mut rng = StdRng::seed_from_u64(4);
        let cell = GRUCell::new(2, 3, &mut rng);

        let input = arr2(&[[1.0, 0.2], [0.5, -0.1]]);
        let hx = arr2(&[[0.1, 0.0], [0.2, 0.0], [0.3, 0.0]]);

        let (_hy, cache) = cell.forward_with_cache(&input, &hx);

        let dhy = Array2::ones((3, 2));
        let (gradients, dx, dhx) = cell.backward(&dhy, &cache);

        assert_eq!(gradients.w_ir.shape(), &[3, 2]);
        assert_eq!(gradients.w_hn.shape(), &[3, 3]);
        assert_eq!(gradients.b_hn.shape(), &[3, 1]);
        assert_eq!(dx.shape(), &[2, 2]);
        assert_eq!(dhx.shape(), &[3, 2]);
    }

    #[test]
    fn test_parameter_count_matches_keras() {
        let mut rng = StdRng::seed_from_u64(1);
        let cell = GRUCell::new(1, 64, &mut rng);
        assert_eq!(cell.num_parameters(), 12_864);
    }

    #[test]
    fn test_zero_update_gate_keeps_state() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut cell = GRUCell::new(1, 2, &mut rng);
        // Strongly negative update bias drives z_t to zero, so h_t ≈ h_{t-1}
        cell.b_iz.fill(-50.0);

        let hx = arr2(&[[0.3], [-0.7]]);
        let hy = cell.forward(&arr2(&[[1.0]]), &hx);
        assert!((&hy - &hx).iter().all(|d| d.abs() < 1e-9));
    }
}
