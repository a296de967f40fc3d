use ndarray::Array2;

/// Loss function trait for training neural networks
pub trait LossFunction {
    /// Compute the loss between predictions and targets
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64;

    /// Compute the gradient of the loss with respect to predictions
    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64>;
}

/// Mean Squared Error loss function
#[derive(Clone, Copy, Debug, Default)]
pub struct MSELoss;

impl LossFunction for MSELoss {
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        mean_squared_error(predictions, targets)
    }

    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
        let diff = predictions - targets;
        2.0 * diff / (predictions.len().max(1) as f64)
    }
}

/// Mean Absolute Error loss function
#[derive(Clone, Copy, Debug, Default)]
pub struct MAELoss;

impl LossFunction for MAELoss {
    fn compute_loss(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
        mean_absolute_error(predictions, targets)
    }

    fn compute_gradient(&self, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
        let diff = predictions - targets;
        let n = predictions.len().max(1) as f64;
        diff.map(|x| if *x > 0.0 { 1.0 } else if *x < 0.0 { -1.0 } else { 0.0 }) / n
    }
}

pub fn mean_squared_error(predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    let diff = predictions - targets;
    (&diff * &diff).sum() / predictions.len() as f64
}

pub fn mean_absolute_error(predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }
    (predictions - targets).map(|x| x.abs()).sum() / predictions.len() as f64
}

/// Square root of the mean squared error, the metric reported per epoch
pub fn root_mean_squared_error(predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    mean_squared_error(predictions, targets).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_mse_loss() {
        let loss_fn = MSELoss;
        let predictions = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let targets = arr2(&[[1.5, 2.5], [2.5, 3.5]]);

        let loss = loss_fn.compute_loss(&predictions, &targets);
        assert!((loss - 0.25).abs() < 1e-6);

        let gradient = loss_fn.compute_gradient(&predictions, &targets);
        assert_eq!(gradient.shape(), predictions.shape());
        assert_abs_diff_eq!(gradient[[0, 0]], -0.25);
    }

    #[test]
    fn test_mae_loss() {
        let loss_fn = MAELoss;
        let predictions = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
        let targets = arr2(&[[1.5, 2.5], [2.5, 3.5]]);

        let loss = loss_fn.compute_loss(&predictions, &targets);
        assert!((loss - 0.5).abs() < 1e-6);

        let gradient = loss_fn.compute_gradient(&predictions, &targets);
        assert_eq!(gradient.shape(), predictions.shape());
    }

    #[test]
    fn test_rmse() {
        let predictions = arr2(&[[0.0, 0.0]]);
        let targets = arr2(&[[3.0, 4.0]]);
        assert_abs_diff_eq!(root_mean_squared_error(&predictions, &targets), 12.5f64.sqrt());
    }

    #[test]
    fn test_empty_metrics_are_zero() {
        let empty = Array2::<f64>::zeros((1, 0));
        assert_eq!(mean_squared_error(&empty, &empty), 0.0);
        assert_eq!(mean_absolute_error(&empty, &empty), 0.0);
    }
}
