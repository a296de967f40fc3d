use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::utils::{relu, sigmoid};

/// Element-wise activation applied after an affine transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Linear => x,
            Activation::Relu => relu(x),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
        }
    }

    /// Derivative expressed in terms of the activation output `y = f(x)`.
    pub fn derivative_from_output(&self, y: f64) -> f64 {
        match self {
            Activation::Linear => 1.0,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
        }
    }

    pub fn forward(&self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Linear => z.clone(),
            _ => z.map(|&x| self.apply(x)),
        }
    }

    /// Maps an output gradient back through the activation: dz = dy ⊙ f'(z)
    pub fn backward(&self, grad_output: &Array2<f64>, output: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Linear => grad_output.clone(),
            _ => grad_output * &output.map(|&y| self.derivative_from_output(y)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_relu_backward_masks_negative_inputs() {
        let z = arr2(&[[-1.0], [2.0]]);
        let y = Activation::Relu.forward(&z);
        assert_eq!(y, arr2(&[[0.0], [2.0]]));

        let grad = Activation::Relu.backward(&arr2(&[[5.0], [5.0]]), &y);
        assert_eq!(grad, arr2(&[[0.0], [5.0]]));
    }

    #[test]
    fn test_tanh_derivative() {
        let y = 0.5_f64.tanh();
        let expected = 1.0 - y * y;
        assert!((Activation::Tanh.derivative_from_output(y) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_serde_names() {
        let parsed: Activation = serde_json::from_str("\"relu\"").unwrap();
        assert_eq!(parsed, Activation::Relu);
        assert!(serde_json::from_str::<Activation>("\"softmax\"").is_err());
    }
}
