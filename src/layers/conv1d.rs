use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::activation::Activation;
use crate::optimizers::Optimizer;
use crate::persistence::array2_serde;
use crate::utils::{glorot_limit, sum_columns};

#[derive(Clone, Debug)]
pub struct Conv1DGradients {
    pub weight: Array2<f64>,
    pub bias: Array2<f64>,
}

#[derive(Clone, Debug)]
pub struct Conv1DCache {
    /// Stacked receptive field for every output step, (kernel_size * in_channels, batch)
    pub patches: Vec<Array2<f64>>,
    pub outputs: Vec<Array2<f64>>,
}

/// One-dimensional convolution over the time axis with valid padding and stride one.
///
/// Output step `t` sees input steps `t..t + kernel_size`, so a sequence of length
/// `T` becomes `T - kernel_size + 1` steps of `filters` channels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conv1DLayer {
    /// (filters, kernel_size * in_channels), tap-major
    #[serde(with = "array2_serde")]
    pub weight: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub bias: Array2<f64>,
    pub in_channels: usize,
    pub filters: usize,
    pub kernel_size: usize,
    pub activation: Activation,
}

impl Conv1DLayer {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        filters: usize,
        kernel_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let fan_in = kernel_size * in_channels;
        let fan_out = kernel_size * filters;
        let limit = glorot_limit(fan_in, fan_out);

        Conv1DLayer {
            weight: Array2::random_using((filters, fan_in), Uniform::new(-limit, limit), rng),
            bias: Array2::zeros((filters, 1)),
            in_channels,
            filters,
            kernel_size,
            activation,
        }
    }

    pub fn output_length(&self, timesteps: usize) -> usize {
        (timesteps + 1).saturating_sub(self.kernel_size)
    }

    pub fn forward(&self, sequence: &[Array2<f64>]) -> Result<Vec<Array2<f64>>> {
        Ok(self.forward_with_cache(sequence)?.0)
    }

    pub fn forward_with_cache(
        &self,
        sequence: &[Array2<f64>],
    ) -> Result<(Vec<Array2<f64>>, Conv1DCache)> {
        let steps = self.output_length(sequence.len());
        let mut patches = Vec::with_capacity(steps);
        let mut outputs = Vec::with_capacity(steps);

        for t in 0..steps {
            let taps: Vec<ArrayView2<f64>> =
                sequence[t..t + self.kernel_size].iter().map(|x| x.view()).collect();
            let patch = concatenate(Axis(0), &taps)?;
            let output = self.activation.forward(&(self.weight.dot(&patch) + &self.bias));
            patches.push(patch);
            outputs.push(output);
        }

        Ok((outputs.clone(), Conv1DCache { patches, outputs }))
    }

    /// Returns parameter gradients and the gradient for every input step
    pub fn backward(
        &self,
        grad_outputs: &[Array2<f64>],
        cache: &Conv1DCache,
    ) -> (Conv1DGradients, Vec<Array2<f64>>) {
        let batch = grad_outputs.first().map(|g| g.ncols()).unwrap_or(0);
        let timesteps = cache.patches.len() + self.kernel_size - 1;

        let mut gradients = self.zero_gradients();
        let mut grad_inputs = vec![Array2::zeros((self.in_channels, batch)); timesteps];

        for (t, grad_output) in grad_outputs.iter().enumerate() {
            let grad_pre_activation = self.activation.backward(grad_output, &cache.outputs[t]);
            gradients.weight += &grad_pre_activation.dot(&cache.patches[t].t());
            gradients.bias += &sum_columns(&grad_pre_activation);

            let grad_patch = self.weight.t().dot(&grad_pre_activation);
            for tap in 0..self.kernel_size {
                let rows = s![tap * self.in_channels..(tap + 1) * self.in_channels, ..];
                grad_inputs[t + tap] += &grad_patch.slice(rows);
            }
        }

        (gradients, grad_inputs)
    }

    pub fn zero_gradients(&self) -> Conv1DGradients {
        Conv1DGradients {
            weight: Array2::zeros(self.weight.raw_dim()),
            bias: Array2::zeros(self.bias.raw_dim()),
        }
    }

    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &Conv1DGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        optimizer.update(&format!("{}_weight", prefix), &mut self.weight, &gradients.weight);
        optimizer.update(&format!("{}_bias", prefix), &mut self.bias, &gradients.bias);
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn unit_sequence(values: &[f64]) -> Vec<Array2<f64>> {
        values.iter().map(|&v| arr2(&[[v]])).collect()
    }

    #[test]
    fn test_output_length_is_valid_padding() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv1DLayer::new(1, 4, 2, Activation::Linear, &mut rng);
        let output = conv.forward(&unit_sequence(&[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert_eq!(output.len(), 4);
        assert_eq!(output[0].shape(), &[4, 1]);
    }

    #[test]
    fn test_difference_kernel() {
        let mut conv = Conv1DLayer {
            weight: arr2(&[[-1.0, 1.0]]),
            bias: arr2(&[[0.0]]),
            in_channels: 1,
            filters: 1,
            kernel_size: 2,
            activation: Activation::Linear,
        };
        let output = conv.forward(&unit_sequence(&[1.0, 4.0, 9.0])).unwrap();
        assert_eq!(output, vec![arr2(&[[3.0]]), arr2(&[[5.0]])]);

        conv.bias = arr2(&[[-4.0]]);
        conv.activation = Activation::Relu;
        let output = conv.forward(&unit_sequence(&[1.0, 4.0, 9.0])).unwrap();
        assert_eq!(output, vec![arr2(&[[0.0]]), arr2(&[[1.0]])]);
    }

    #[test]
    fn test_backward_spreads_gradient_over_taps() {
        let conv = Conv1DLayer {
            weight: arr2(&[[2.0, 3.0]]),
            bias: arr2(&[[0.0]]),
            in_channels: 1,
            filters: 1,
            kernel_size: 2,
            activation: Activation::Linear,
        };
        let (_, cache) = conv.forward_with_cache(&unit_sequence(&[1.0, 1.0, 1.0])).unwrap();
        let grads = vec![arr2(&[[1.0]]), arr2(&[[1.0]])];
        let (gradients, grad_inputs) = conv.backward(&grads, &cache);

        assert_eq!(grad_inputs, vec![arr2(&[[2.0]]), arr2(&[[5.0]]), arr2(&[[3.0]])]);
        assert_eq!(gradients.weight, arr2(&[[2.0, 2.0]]));
        assert_eq!(gradients.bias, arr2(&[[2.0]]));
    }

    #[test]
    fn test_parameter_count_matches_keras() {
        let mut rng = StdRng::seed_from_u64(0);
        let conv = Conv1DLayer::new(1, 64, 2, Activation::Linear, &mut rng);
        assert_eq!(conv.num_parameters(), 192);
        let conv = Conv1DLayer::new(6, 64, 2, Activation::Relu, &mut rng);
        assert_eq!(conv.num_parameters(), 832);
    }
}
