//! Numeric helpers shared by the layers.
use ndarray::{Array2, Axis};

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Rectified linear unit: max(0, x)
pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Sums a (rows, batch) gradient over the batch, keeping a column vector.
pub fn sum_columns(matrix: &Array2<f64>) -> Array2<f64> {
    matrix.sum_axis(Axis(1)).insert_axis(Axis(1))
}

/// Glorot/Xavier uniform limit for a weight matrix with the given fan-in and fan-out.
pub fn glorot_limit(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}
