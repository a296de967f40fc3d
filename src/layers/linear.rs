use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::layers::activation::Activation;
use crate::optimizers::Optimizer;
use crate::persistence::array2_serde;
use crate::utils::{glorot_limit, sum_columns};

/// Holds gradients for dense layer parameters during backpropagation
#[derive(Clone, Debug)]
pub struct LinearGradients {
    pub weight: Array2<f64>,
    pub bias: Array2<f64>,
}

/// Values kept from the forward pass of a dense layer
#[derive(Clone, Debug)]
pub struct LinearCache {
    pub input: Array2<f64>,
    pub output: Array2<f64>,
}

/// A fully connected (dense) layer
///
/// Performs the transformation: output = activation(weight · input + bias)
/// where weight has shape (output_size, input_size), bias has shape (output_size, 1)
/// and input holds one sample per column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearLayer {
    #[serde(with = "array2_serde")]
    pub weight: Array2<f64>,
    #[serde(with = "array2_serde")]
    pub bias: Array2<f64>,
    pub input_size: usize,
    pub output_size: usize,
    pub activation: Activation,
}

impl LinearLayer {
    /// Create a new dense layer with Glorot-uniform weights and zero bias
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = glorot_limit(input_size, output_size);
        let distribution = Uniform::new(-limit, limit);
        let weight = Array2::random_using((output_size, input_size), distribution, rng);
        let bias = Array2::zeros((output_size, 1));

        Self {
            weight,
            bias,
            input_size,
            output_size,
            activation,
        }
    }

    /// Create a new dense layer with zero initialization
    pub fn new_zeros(input_size: usize, output_size: usize, activation: Activation) -> Self {
        Self {
            weight: Array2::zeros((output_size, input_size)),
            bias: Array2::zeros((output_size, 1)),
            input_size,
            output_size,
            activation,
        }
    }

    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        self.activation.forward(&(self.weight.dot(input) + &self.bias))
    }

    pub fn forward_with_cache(&self, input: &Array2<f64>) -> (Array2<f64>, LinearCache) {
        let output = self.forward(input);
        let cache = LinearCache {
            input: input.clone(),
            output: output.clone(),
        };
        (output, cache)
    }

    /// Backward pass through the dense layer
    ///
    /// Returns (gradients, input_gradient)
    pub fn backward(
        &self,
        grad_output: &Array2<f64>,
        cache: &LinearCache,
    ) -> (LinearGradients, Array2<f64>) {
        let grad_pre_activation = self.activation.backward(grad_output, &cache.output);

        let gradients = LinearGradients {
            weight: grad_pre_activation.dot(&cache.input.t()),
            bias: sum_columns(&grad_pre_activation),
        };
        let input_grad = self.weight.t().dot(&grad_pre_activation);

        (gradients, input_grad)
    }

    /// Update parameters using the provided optimizer
    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &LinearGradients,
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
    use crate::optimizers::SGD;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_layer_creation() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = LinearLayer::new(10, 5, Activation::Relu, &mut rng);
        assert_eq!(layer.weight.shape(), &[5, 10]);
        assert_eq!(layer.bias.shape(), &[5, 1]);
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_layer_forward_zero_weights() {
        let layer = LinearLayer::new_zeros(3, 2, Activation::Linear);
        let input = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);

        let output = layer.forward(&input);
        assert_eq!(output.shape(), &[2, 2]);
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_relu_clamps_output() {
        let mut layer = LinearLayer::new_zeros(1, 2, Activation::Relu);
        layer.weight = arr2(&[[1.0], [-1.0]]);
        let output = layer.forward(&arr2(&[[2.0]]));
        assert_eq!(output, arr2(&[[2.0], [0.0]]));
    }

    #[test]
    fn test_linear_layer_backward_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = LinearLayer::new(3, 2, Activation::Linear, &mut rng);
        let input = arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let (_, cache) = layer.forward_with_cache(&input);

        let (gradients, input_grad) = layer.backward(&Array2::ones((2, 2)), &cache);

        assert_eq!(gradients.weight.shape(), &[2, 3]);
        assert_eq!(gradients.bias, arr2(&[[2.0], [2.0]]));
        assert_eq!(input_grad.shape(), &[3, 2]);
    }

    #[test]
    fn test_linear_layer_with_optimizer() {
        let mut layer = LinearLayer::new_zeros(2, 1, Activation::Linear);
        let mut optimizer = SGD::new(0.1);

        let input = arr2(&[[1.0], [2.0]]);
        let target = arr2(&[[3.0]]);

        let (output, cache) = layer.forward_with_cache(&input);
        let grad_output = &output - &target;
        let (gradients, _) = layer.backward(&grad_output, &cache);
        layer.update_parameters(&gradients, &mut optimizer, "dense");

        // w -= 0.1 * (-3 * x), b -= 0.1 * -3
        assert!((layer.weight[[0, 0]] - 0.3).abs() < 1e-12);
        assert!((layer.weight[[0, 1]] - 0.6).abs() < 1e-12);
        assert!((layer.bias[[0, 0]] - 0.3).abs() < 1e-12);
    }
}
