use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::data::scaler::StandardScaler;
use crate::data::window::WindowedDataset;
use crate::error::{ForecastError, Result};
use crate::loss::{mean_absolute_error, mean_squared_error, LossFunction, MSELoss};
use crate::models::sequential::{LayerGradients, Sequential, Tensor};
use crate::optimizers::{Optimizer, OptimizerConfig};
use crate::persistence::{save_checkpoint, ModelPersistence, SaveFormat};

/// Configuration for training hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: OptimizerConfig,
    /// Per-matrix gradient norm limit
    pub clip_gradient: Option<f64>,
    /// Reshuffle training samples every epoch
    pub shuffle: bool,
    pub seed: u64,
    /// Log every n-th epoch; the last epoch is always logged
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 10,
            batch_size: 32,
            optimizer: OptimizerConfig::default(),
            clip_gradient: None,
            shuffle: true,
            seed: 42,
            log_every: 1,
        }
    }
}

/// Training metrics tracked during training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub train_rmse: f64,
    pub validation_loss: Option<f64>,
    pub validation_rmse: Option<f64>,
    pub time_elapsed: f64,
}

impl TrainingMetrics {
    /// Loss a checkpoint watches: validation when available
    pub fn monitored_loss(&self) -> f64 {
        self.validation_loss.unwrap_or(self.train_loss)
    }
}

/// Error metrics over a whole dataset, in the units the targets are stored in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
}

impl EvaluationMetrics {
    pub fn from_predictions(predictions: &Array2<f64>, actuals: &Array2<f64>) -> Self {
        let mse = mean_squared_error(predictions, actuals);
        EvaluationMetrics {
            mse,
            rmse: mse.sqrt(),
            mae: mean_absolute_error(predictions, actuals),
        }
    }
}

/// Saves the model to a directory whenever the monitored loss improves.
///
/// The monitored loss is the validation loss, or the training loss when an
/// epoch has no validation split.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    pub dir: PathBuf,
    pub save_best_only: bool,
    pub format: SaveFormat,
    scaler: Option<StandardScaler>,
    best: Option<f64>,
}

impl ModelCheckpoint {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        ModelCheckpoint {
            dir: dir.as_ref().to_path_buf(),
            save_best_only: true,
            format: SaveFormat::default(),
            scaler: None,
            best: None,
        }
    }

    pub fn with_format(mut self, format: SaveFormat) -> Self {
        self.format = format;
        self
    }

    pub fn save_best_only(mut self, save_best_only: bool) -> Self {
        self.save_best_only = save_best_only;
        self
    }

    /// Normalization statistics stored alongside every saved model
    pub fn with_scaler(mut self, scaler: Option<StandardScaler>) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Returns whether the model was written
    pub fn on_epoch_end(&mut self, model: &Sequential, metrics: &TrainingMetrics) -> Result<bool> {
        let monitored = metrics.monitored_loss();
        // A NaN or infinite loss never becomes the best
        let improved = monitored.is_finite() && self.best.map_or(true, |best| monitored < best);
        if self.save_best_only && !improved {
            debug!(epoch = metrics.epoch, loss = monitored, "monitored loss did not improve");
            return Ok(false);
        }
        if improved {
            self.best = Some(monitored);
        }

        let saved = ModelPersistence::create_saved_model(
            model,
            metrics.epoch,
            Some(metrics.train_loss),
            metrics.validation_loss,
            self.scaler.clone(),
            None,
        );
        let path = save_checkpoint(&self.dir, &saved, self.format)?;
        debug!(epoch = metrics.epoch, loss = monitored, path = %path.display(), "saved checkpoint");
        Ok(true)
    }
}

/// Mini-batch trainer for a [`Sequential`] model with configurable loss and optimizer
pub struct Trainer<L: LossFunction, O: Optimizer> {
    pub model: Sequential,
    pub loss_function: L,
    pub optimizer: O,
    pub config: TrainingConfig,
    pub metrics_history: Vec<TrainingMetrics>,
}

impl<L: LossFunction, O: Optimizer> Trainer<L, O> {
    pub fn new(model: Sequential, loss_function: L, optimizer: O) -> Self {
        Trainer {
            model,
            loss_function,
            optimizer,
            config: TrainingConfig::default(),
            metrics_history: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    /// One forward/backward pass and parameter update; returns the batch loss
    pub fn train_batch(&mut self, input: &Tensor, targets: &Array2<f64>) -> Result<f64> {
        let (outputs, caches) = self.model.forward_with_cache(input)?;
        if outputs.shape() != targets.shape() {
            return Err(ForecastError::ShapeMismatch(format!(
                "model output {:?} does not match targets {:?}",
                outputs.shape(),
                targets.shape()
            )));
        }

        let loss = self.loss_function.compute_loss(&outputs, targets);
        let grad = self.loss_function.compute_gradient(&outputs, targets);
        let mut gradients = self.model.backward(&grad, &caches)?;

        if let Some(clip_value) = self.config.clip_gradient {
            clip_gradients(&mut gradients, clip_value);
        }

        self.model.update_parameters(&gradients, &mut self.optimizer);
        Ok(loss)
    }

    /// Runs `config.epochs` epochs of mini-batch training.
    ///
    /// After every epoch the validation split (if non-empty) is evaluated and
    /// the checkpoint, if any, decides whether to save.
    pub fn fit(
        &mut self,
        train: &WindowedDataset,
        validation: Option<&WindowedDataset>,
        mut checkpoint: Option<&mut ModelCheckpoint>,
    ) -> Result<&[TrainingMetrics]> {
        if train.is_empty() {
            return Err(ForecastError::InsufficientData(
                "training split has no samples".to_string(),
            ));
        }
        if self.config.batch_size == 0 {
            return Err(ForecastError::Config("batch size must be positive".to_string()));
        }
        let validation = validation.filter(|v| !v.is_empty());
        if validation.is_none() {
            warn!(model = %self.model.name, "no validation samples, monitoring training loss");
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let first_epoch = self.metrics_history.len() + 1;

        info!(
            model = %self.model.name,
            samples = train.len(),
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            "starting training"
        );

        for epoch in first_epoch..first_epoch + self.config.epochs {
            let start_time = Instant::now();
            if self.config.shuffle {
                order.shuffle(&mut rng);
            }

            let mut squared_error_sum = 0.0;
            for indices in order.chunks(self.config.batch_size) {
                let (input, targets) = train.batch(indices);
                let loss = self.train_batch(&input, &targets)?;
                // Weight by batch share so the epoch loss is a per-sample mean
                squared_error_sum += loss * indices.len() as f64;
            }
            let train_loss = squared_error_sum / train.len() as f64;

            let validation_loss = match validation {
                Some(data) => Some(self.evaluate(data)?.mse),
                None => None,
            };

            let metrics = TrainingMetrics {
                epoch,
                train_loss,
                train_rmse: train_loss.sqrt(),
                validation_loss,
                validation_rmse: validation_loss.map(f64::sqrt),
                time_elapsed: start_time.elapsed().as_secs_f64(),
            };

            let saved = match checkpoint.as_deref_mut() {
                Some(checkpoint) => checkpoint.on_epoch_end(&self.model, &metrics)?,
                None => false,
            };

            let last = epoch + 1 == first_epoch + self.config.epochs;
            if last || (epoch - first_epoch) % self.config.log_every.max(1) == 0 {
                info!(
                    model = %self.model.name,
                    epoch,
                    loss = metrics.train_loss,
                    rmse = metrics.train_rmse,
                    val_loss = ?metrics.validation_loss,
                    val_rmse = ?metrics.validation_rmse,
                    saved,
                    secs = metrics.time_elapsed,
                    "epoch finished"
                );
            }
            self.metrics_history.push(metrics);
        }

        Ok(self.metrics_history.as_slice())
    }

    /// Model outputs as (samples, targets)
    pub fn predict(&self, data: &WindowedDataset) -> Result<Array2<f64>> {
        predict(&self.model, data, self.config.batch_size)
    }

    pub fn evaluate(&self, data: &WindowedDataset) -> Result<EvaluationMetrics> {
        let predictions = self.predict(data)?;
        Ok(EvaluationMetrics::from_predictions(&predictions, &data.targets))
    }

    pub fn get_latest_metrics(&self) -> Option<&TrainingMetrics> {
        self.metrics_history.last()
    }

    pub fn get_metrics_history(&self) -> &[TrainingMetrics] {
        &self.metrics_history
    }

    pub fn into_model(self) -> Sequential {
        self.model
    }
}

/// Runs `model` over every sample in order, returning (samples, targets)
pub fn predict(
    model: &Sequential,
    data: &WindowedDataset,
    batch_size: usize,
) -> Result<Array2<f64>> {
    let outputs = model.output_size()?;
    let mut predictions = Array2::zeros((data.len(), outputs));
    for indices in data.sequential_batches(batch_size) {
        let (input, _) = data.batch(&indices);
        let output = model.forward(&input)?;
        for (column, &sample) in output.axis_iter(Axis(1)).zip(&indices) {
            predictions.row_mut(sample).assign(&column);
        }
    }
    Ok(predictions)
}

/// Clip gradients by per-matrix norm to prevent exploding gradients
fn clip_gradients(gradients: &mut [LayerGradients], max_norm: f64) {
    for gradient in gradients.iter_mut() {
        for matrix in gradient.matrices_mut() {
            clip_gradient_matrix(matrix, max_norm);
        }
    }
}

fn clip_gradient_matrix(matrix: &mut Array2<f64>, max_norm: f64) {
    let norm = matrix.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        matrix.mapv_inplace(|x| x * scale);
    }
}

/// Trainer with MSE loss and the optimizer named in `config`
pub fn create_trainer(
    model: Sequential,
    config: TrainingConfig,
) -> Trainer<MSELoss, Box<dyn Optimizer>> {
    let optimizer = config.optimizer.build();
    Trainer::new(model, MSELoss, optimizer).with_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::window::make_windows;
    use crate::layers::activation::Activation;
    use crate::models::spec::{LayerSpec, ModelSpec};
    use crate::optimizers::Adam;
    use crate::persistence::load_checkpoint;
    use ndarray::Array;
    use tempfile::tempdir;

    fn sine_windows(rows: usize) -> WindowedDataset {
        let frame = Array::from_shape_fn((rows, 1), |(r, _)| (r as f64 * 0.3).sin());
        make_windows(&frame, 5, &[0]).unwrap()
    }

    fn small_model() -> Sequential {
        let spec = ModelSpec::new(
            "small",
            (5, 1),
            vec![LayerSpec::lstm(8), LayerSpec::dense(1, Activation::Linear)],
        );
        Sequential::from_spec(&spec, 7).unwrap()
    }

    fn quick_config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            batch_size: 16,
            optimizer: OptimizerConfig::Adam { learning_rate: 0.01 },
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.optimizer, OptimizerConfig::Adam { learning_rate: 1e-4 });

        let parsed: TrainingConfig = serde_json::from_str(r#"{"epochs": 3}"#).unwrap();
        assert_eq!(parsed.epochs, 3);
        assert_eq!(parsed.batch_size, 32);
    }

    #[test]
    fn test_training_lowers_loss() {
        let data = sine_windows(200);
        let mut trainer = create_trainer(small_model(), quick_config(15));

        let history = trainer.fit(&data, None, None).unwrap();
        assert_eq!(history.len(), 15);
        assert_eq!(history[0].epoch, 1);
        assert!(history[14].train_loss < history[0].train_loss);
    }

    #[test]
    fn test_predict_shape_and_order() {
        let data = sine_windows(60);
        let trainer = Trainer::new(small_model(), MSELoss, Adam::default());
        let predictions = trainer.predict(&data).unwrap();
        assert_eq!(predictions.shape(), &[55, 1]);

        // Batching does not change per-sample outputs
        let single = predict(&trainer.model, &data.slice(10..11), 1).unwrap();
        assert!((single[[0, 0]] - predictions[[10, 0]]).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_metrics_agree() {
        let data = sine_windows(60);
        let trainer = Trainer::new(small_model(), MSELoss, Adam::default());
        let metrics = trainer.evaluate(&data).unwrap();
        assert!((metrics.rmse - metrics.mse.sqrt()).abs() < 1e-12);
        assert!(metrics.mae <= metrics.rmse + 1e-12);
    }

    #[test]
    fn test_empty_training_split() {
        let data = sine_windows(60).slice(0..0);
        let mut trainer = create_trainer(small_model(), quick_config(1));
        assert!(matches!(trainer.fit(&data, None, None), Err(ForecastError::InsufficientData(_))));
    }

    #[test]
    fn test_checkpoint_keeps_best_epoch() {
        let dir = tempdir().unwrap();
        let data = sine_windows(120);
        let mut checkpoint =
            ModelCheckpoint::new(dir.path().join("small")).with_format(SaveFormat::Json);
        let mut trainer = create_trainer(small_model(), quick_config(5));

        let history = trainer
            .fit(&data.slice(0..90), Some(&data.slice(90..115)), Some(&mut checkpoint))
            .unwrap()
            .to_vec();

        let best = history
            .iter()
            .min_by(|a, b| a.monitored_loss().total_cmp(&b.monitored_loss()))
            .unwrap();
        let saved = load_checkpoint(dir.path().join("small")).unwrap();
        assert_eq!(saved.metadata.epoch, best.epoch);
        assert_eq!(checkpoint.best(), best.validation_loss);
    }

    #[test]
    fn test_checkpoint_skips_worse_epochs() {
        let dir = tempdir().unwrap();
        let model = small_model();
        let mut checkpoint = ModelCheckpoint::new(dir.path());
        let metrics = |epoch, loss| TrainingMetrics {
            epoch,
            train_loss: loss,
            train_rmse: f64::sqrt(loss),
            validation_loss: None,
            validation_rmse: None,
            time_elapsed: 0.0,
        };

        assert!(checkpoint.on_epoch_end(&model, &metrics(1, 0.5)).unwrap());
        assert!(!checkpoint.on_epoch_end(&model, &metrics(2, 0.7)).unwrap());
        assert!(checkpoint.on_epoch_end(&model, &metrics(3, 0.2)).unwrap());
        assert_eq!(load_checkpoint(dir.path()).unwrap().metadata.epoch, 3);
    }

    #[test]
    fn test_checkpoint_ignores_non_finite_loss() {
        let dir = tempdir().unwrap();
        let model = small_model();
        let mut checkpoint = ModelCheckpoint::new(dir.path());
        let metrics = |epoch, loss: f64| TrainingMetrics {
            epoch,
            train_loss: loss,
            train_rmse: loss.sqrt(),
            validation_loss: Some(loss),
            validation_rmse: Some(loss.sqrt()),
            time_elapsed: 0.0,
        };

        assert!(!checkpoint.on_epoch_end(&model, &metrics(1, f64::NAN)).unwrap());
        assert!(!checkpoint.on_epoch_end(&model, &metrics(2, f64::INFINITY)).unwrap());
        assert_eq!(checkpoint.best(), None);
        assert!(checkpoint.on_epoch_end(&model, &metrics(3, 0.4)).unwrap());
        assert!(checkpoint.on_epoch_end(&model, &metrics(4, 0.3)).unwrap());
        assert_eq!(checkpoint.best(), Some(0.3));
        assert_eq!(load_checkpoint(dir.path()).unwrap().metadata.epoch, 4);
    }

    #[test]
    fn test_clip_gradient_matrix() {
        let mut matrix = ndarray::arr2(&[[3.0, 4.0]]);
        clip_gradient_matrix(&mut matrix, 1.0);
        assert!((matrix[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((matrix[[0, 1]] - 0.8).abs() < 1e-12);
    }
}
