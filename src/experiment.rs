use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::features::{build_frame, Column};
use crate::data::record::{ClimateRecord, Subsample};
use crate::data::scaler::StandardScaler;
use crate::data::split::{Partition, Split, Splits};
use crate::data::window::{make_windows, WindowedDataset};
use crate::error::{ForecastError, Result};
use crate::layers::activation::Activation;
use crate::models::sequential::Sequential;
use crate::models::spec::{LayerSpec, ModelSpec};
use crate::persistence::{
    checkpoint_file, clear_checkpoint, load_checkpoint, read_json, write_json, ModelPersistence,
    SaveFormat,
};
use crate::report::PredictionReport;
use crate::training::{
    create_trainer, predict, EvaluationMetrics, ModelCheckpoint, TrainingConfig, TrainingMetrics,
};

/// File holding the experiment configuration inside a checkpoint directory
pub const EXPERIMENT_FILE: &str = "experiment.json";

/// Everything needed to reproduce one forecasting run: data preparation,
/// layer stack and training settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Frame columns, in input feature order
    pub columns: Vec<Column>,
    pub window_size: usize,
    /// Indices into `columns` predicted at the next step
    pub target_columns: Vec<usize>,
    /// Indices into `columns` that are z-score normalized
    #[serde(default)]
    pub normalized_columns: Vec<usize>,
    /// Normalize labels with the statistics of their source column
    #[serde(default)]
    pub normalize_targets: bool,
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub split: Split,
    #[serde(default)]
    pub subsample: Subsample,
    #[serde(default)]
    pub training: TrainingConfig,
    /// Weight initialisation seed
    #[serde(default)]
    pub seed: u64,
}

fn lstm_head(outputs: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::lstm(64),
        LayerSpec::dense(8, Activation::Relu),
        LayerSpec::dense(outputs, Activation::Linear),
    ]
}

fn conv_head(activation: Activation, outputs: usize) -> Vec<LayerSpec> {
    vec![
        LayerSpec::conv1d(64, 2, activation),
        LayerSpec::Flatten,
        LayerSpec::dense(8, Activation::Relu),
        LayerSpec::dense(outputs, Activation::Linear),
    ]
}

impl ExperimentConfig {
    fn base(
        name: &str,
        description: &str,
        columns: Vec<Column>,
        window_size: usize,
        layers: Vec<LayerSpec>,
    ) -> Self {
        ExperimentConfig {
            name: name.to_string(),
            description: description.to_string(),
            columns,
            window_size,
            target_columns: vec![0],
            normalized_columns: Vec::new(),
            normalize_targets: false,
            layers,
            split: Split::default(),
            subsample: Subsample::default(),
            training: TrainingConfig::default(),
            seed: 0,
        }
    }

    fn pressure_and_temperature(name: &str, description: &str, layers: Vec<LayerSpec>) -> Self {
        let mut columns = vec![Column::PRESSURE, Column::TEMPERATURE];
        columns.extend(Column::TIME_OF_DAY_AND_YEAR);
        ExperimentConfig {
            target_columns: vec![0, 1],
            normalized_columns: vec![0, 1],
            normalize_targets: true,
            ..Self::base(name, description, columns, 7, layers)
        }
    }

    /// The seven model variants, in order
    pub fn presets() -> Vec<ExperimentConfig> {
        let temperature = vec![Column::TEMPERATURE];
        let mut temperature_and_time = vec![Column::TEMPERATURE];
        temperature_and_time.extend(Column::TIME_OF_DAY_AND_YEAR);

        vec![
            Self::base(
                "model1",
                "temperature, window 5, LSTM",
                temperature.clone(),
                5,
                lstm_head(1),
            ),
            Self::base(
                "model2",
                "temperature, window 5, Conv1D",
                temperature.clone(),
                5,
                conv_head(Activation::Linear, 1),
            ),
            Self::base(
                "model3",
                "temperature, window 5, GRU",
                temperature,
                5,
                vec![
                    LayerSpec::gru(64),
                    LayerSpec::dense(8, Activation::Relu),
                    LayerSpec::dense(1, Activation::Linear),
                ],
            ),
            ExperimentConfig {
                normalized_columns: vec![0],
                ..Self::base(
                    "model4",
                    "temperature with day/year encodings, window 6, LSTM",
                    temperature_and_time,
                    6,
                    lstm_head(1),
                )
            },
            Self::pressure_and_temperature(
                "model5",
                "pressure and temperature, window 7, LSTM",
                lstm_head(2),
            ),
            Self::pressure_and_temperature(
                "model6",
                "pressure and temperature, window 7, stacked LSTM",
                vec![
                    LayerSpec::Lstm { units: 32, return_sequences: true },
                    LayerSpec::lstm(64),
                    LayerSpec::dense(8, Activation::Relu),
                    LayerSpec::dense(2, Activation::Linear),
                ],
            ),
            Self::pressure_and_temperature(
                "model7",
                "pressure and temperature, window 7, Conv1D",
                conv_head(Activation::Relu, 2),
            ),
        ]
    }

    pub fn preset(name: &str) -> Result<ExperimentConfig> {
        Self::presets().into_iter().find(|p| p.name == name).ok_or_else(|| {
            ForecastError::Config(format!(
                "unknown experiment '{}', expected model1 to model7",
                name
            ))
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ExperimentConfig> {
        let config: ExperimentConfig = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(self, path)
    }

    pub fn model_spec(&self) -> ModelSpec {
        let input_shape = (self.window_size, self.columns.len());
        ModelSpec::new(self.name.clone(), input_shape, self.layers.clone())
    }

    pub fn target_names(&self) -> Vec<String> {
        self.target_columns.iter().map(|&c| self.columns[c].to_string()).collect()
    }

    /// Checks column references and that the layer stack yields one output per target
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(ForecastError::Config(format!("experiment '{}' has no columns", self.name)));
        }
        let out_of_range = self
            .target_columns
            .iter()
            .chain(&self.normalized_columns)
            .find(|&&c| c >= self.columns.len());
        if let Some(c) = out_of_range {
            return Err(ForecastError::Config(format!(
                "column index {} out of range for {} columns",
                c,
                self.columns.len()
            )));
        }
        if self.target_columns.is_empty() {
            return Err(ForecastError::Config(format!("experiment '{}' has no targets", self.name)));
        }
        if self.window_size == 0 {
            return Err(ForecastError::Config("window size must be positive".to_string()));
        }

        let outputs = self.model_spec().output_size()?;
        if outputs != self.target_columns.len() {
            return Err(ForecastError::InvalidModel(format!(
                "model '{}' produces {} outputs for {} targets",
                self.name,
                outputs,
                self.target_columns.len()
            )));
        }
        Ok(())
    }

    pub fn build_model(&self) -> Result<Sequential> {
        Sequential::from_spec(&self.model_spec(), self.seed)
    }

    /// Subsamples, windows and splits the records, then fits the scaler on
    /// the training inputs and normalizes every split
    pub fn prepare(&self, records: &[ClimateRecord]) -> Result<PreparedData> {
        self.prepare_with(records, None)
    }

    /// Like [`prepare`](Self::prepare), reusing saved statistics when given
    pub fn prepare_with(
        &self,
        records: &[ClimateRecord],
        scaler: Option<StandardScaler>,
    ) -> Result<PreparedData> {
        self.validate()?;

        let hourly = self.subsample.apply(records)?;
        let frame = build_frame(&hourly, &self.columns);
        let windows = make_windows(&frame, self.window_size, &self.target_columns)?;
        let raw = self.split.apply(&windows)?;

        let scaler = match scaler {
            Some(scaler) => Some(scaler),
            None if self.normalized_columns.is_empty() => None,
            None => {
                let mut scaler = StandardScaler::new();
                scaler.fit(&raw.train.inputs, &self.normalized_columns)?;
                Some(scaler)
            }
        };

        let splits = match &scaler {
            Some(scaler) => Splits {
                train: scaler.transform_dataset(&raw.train, self.normalize_targets)?,
                validation: scaler.transform_dataset(&raw.validation, self.normalize_targets)?,
                test: scaler.transform_dataset(&raw.test, self.normalize_targets)?,
            },
            None => raw,
        };

        info!(
            experiment = %self.name,
            rows = hourly.len(),
            train = splits.train.len(),
            validation = splits.validation.len(),
            test = splits.test.len(),
            "prepared windows"
        );

        Ok(PreparedData {
            splits,
            scaler,
            normalize_targets: self.normalize_targets,
            target_names: self.target_names(),
        })
    }

    /// Trains a fresh model, checkpointing the best epoch into `checkpoint_dir`,
    /// then reloads that checkpoint and evaluates it on every split
    pub fn run(
        &self,
        records: &[ClimateRecord],
        checkpoint_dir: &Path,
        format: SaveFormat,
    ) -> Result<ExperimentOutcome> {
        let data = self.prepare(records)?;
        let model = self.build_model()?;
        info!(experiment = %self.name, parameters = model.num_parameters(), "built model");

        std::fs::create_dir_all(checkpoint_dir)?;
        clear_checkpoint(checkpoint_dir)?;
        self.save(checkpoint_dir.join(EXPERIMENT_FILE))?;

        let mut checkpoint = ModelCheckpoint::new(checkpoint_dir)
            .with_format(format)
            .with_scaler(data.scaler.clone());
        let mut trainer = create_trainer(model, self.training.clone());
        let history = trainer
            .fit(&data.splits.train, Some(&data.splits.validation), Some(&mut checkpoint))?
            .to_vec();

        let best = ModelPersistence::load(checkpoint_file(checkpoint_dir, format))?;
        if best.model.spec() != self.model_spec() {
            return Err(ForecastError::InvalidModel(format!(
                "checkpoint in {} does not match experiment '{}'",
                checkpoint_dir.display(),
                self.name
            )));
        }
        info!(
            experiment = %self.name,
            epoch = best.metadata.epoch,
            val_loss = ?best.metadata.val_loss,
            "reloaded best checkpoint"
        );

        let batch_size = self.training.batch_size;
        let train = evaluate_split(&best.model, &data.splits.train, batch_size)?;
        let validation = evaluate_split(&best.model, &data.splits.validation, batch_size)?;
        let test = evaluate_split(&best.model, &data.splits.test, batch_size)?;
        let report = data.report(&best.model, Partition::Test, batch_size)?;

        Ok(ExperimentOutcome {
            name: self.name.clone(),
            num_parameters: best.model.num_parameters(),
            best_epoch: best.metadata.epoch,
            history,
            train,
            validation,
            test,
            report,
            checkpoint_dir: checkpoint_dir.to_path_buf(),
        })
    }
}

/// Normalized splits plus what is needed to map predictions back to physical units
#[derive(Clone, Debug)]
pub struct PreparedData {
    pub splits: Splits,
    pub scaler: Option<StandardScaler>,
    pub normalize_targets: bool,
    pub target_names: Vec<String>,
}

impl PreparedData {
    /// Predictions against actuals for one split, denormalized when the
    /// labels were normalized
    pub fn report(
        &self,
        model: &Sequential,
        partition: Partition,
        batch_size: usize,
    ) -> Result<PredictionReport> {
        let data = self.splits.get(partition);
        let mut predictions = predict(model, data, batch_size)?;
        let mut actuals = data.targets.clone();

        if let (true, Some(scaler)) = (self.normalize_targets, &self.scaler) {
            predictions = scaler.inverse_transform_targets(&predictions, &data.target_columns)?;
            actuals = scaler.inverse_transform_targets(&actuals, &data.target_columns)?;
        }

        PredictionReport::new(self.target_names.clone(), predictions, actuals)
    }
}

fn evaluate_split(
    model: &Sequential,
    data: &WindowedDataset,
    batch_size: usize,
) -> Result<Option<EvaluationMetrics>> {
    if data.is_empty() {
        return Ok(None);
    }
    let predictions = predict(model, data, batch_size)?;
    Ok(Some(EvaluationMetrics::from_predictions(&predictions, &data.targets)))
}

/// Result of [`ExperimentConfig::run`]; split metrics are in training units
#[derive(Clone, Debug)]
pub struct ExperimentOutcome {
    pub name: String,
    pub num_parameters: usize,
    pub best_epoch: usize,
    pub history: Vec<TrainingMetrics>,
    pub train: Option<EvaluationMetrics>,
    pub validation: Option<EvaluationMetrics>,
    pub test: Option<EvaluationMetrics>,
    /// Test split in physical units
    pub report: PredictionReport,
    pub checkpoint_dir: PathBuf,
}

/// Reloads a checkpoint directory written by [`ExperimentConfig::run`] and
/// reports on one split
pub fn evaluate_checkpoint(
    records: &[ClimateRecord],
    checkpoint_dir: &Path,
    partition: Partition,
) -> Result<(EvaluationMetrics, PredictionReport)> {
    let config = ExperimentConfig::load(checkpoint_dir.join(EXPERIMENT_FILE))?;
    let saved = load_checkpoint(checkpoint_dir)?;
    if saved.model.spec() != config.model_spec() {
        return Err(ForecastError::InvalidModel(format!(
            "checkpoint in {} does not match its experiment '{}'",
            checkpoint_dir.display(),
            config.name
        )));
    }

    let data = config.prepare_with(records, saved.scaler.clone())?;
    let split = data.splits.get(partition);
    let metrics = evaluate_split(&saved.model, split, config.training.batch_size)?.ok_or_else(|| {
        ForecastError::InsufficientData(format!(
            "{:?} split of '{}' is empty",
            partition, config.name
        ))
    })?;
    let report = data.report(&saved.model, partition, config.training.batch_size)?;
    Ok((metrics, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::generate_records;

    #[test]
    fn test_presets_are_valid() {
        let presets = ExperimentConfig::presets();
        assert_eq!(presets.len(), 7);
        for (i, preset) in presets.iter().enumerate() {
            assert_eq!(preset.name, format!("model{}", i + 1));
            preset.validate().unwrap();
        }
    }

    #[test]
    fn test_preset_shapes() {
        let model1 = ExperimentConfig::preset("model1").unwrap();
        assert_eq!(model1.model_spec().input_shape, (5, 1));
        assert_eq!(model1.build_model().unwrap().num_parameters(), 17_425);

        let model4 = ExperimentConfig::preset("model4").unwrap();
        assert_eq!(model4.model_spec().input_shape, (6, 5));
        assert!(!model4.normalize_targets);

        let model5 = ExperimentConfig::preset("model5").unwrap();
        assert_eq!(model5.model_spec().input_shape, (7, 6));
        assert_eq!(model5.target_names(), vec!["p (mbar)", "T (degC)"]);

        let model7 = ExperimentConfig::preset("model7").unwrap();
        assert_eq!(model7.layers[0], LayerSpec::conv1d(64, 2, Activation::Relu));

        assert!(ExperimentConfig::preset("model8").is_err());
    }

    #[test]
    fn test_output_count_must_match_targets() {
        let mut config = ExperimentConfig::preset("model5").unwrap();
        config.target_columns = vec![1];
        assert!(matches!(config.validate(), Err(ForecastError::InvalidModel(_))));

        config.target_columns = vec![1, 9];
        assert!(matches!(config.validate(), Err(ForecastError::Config(_))));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = ExperimentConfig::preset("model6").unwrap();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: ExperimentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_prepare_normalizes_training_split() {
        let records = generate_records(6 * 400, 11);
        let mut config = ExperimentConfig::preset("model5").unwrap();
        config.split = Split::Fractions { train: 0.7, val: 0.15 };

        let data = config.prepare(&records).unwrap();
        // 400 hourly rows, window 7
        let total = data.splits.train.len() + data.splits.validation.len() + data.splits.test.len();
        assert_eq!(total, 393);

        let scaler = data.scaler.as_ref().unwrap();
        assert_eq!(scaler.stats().len(), 2);
        let pressure = data.splits.train.inputs.index_axis(ndarray::Axis(2), 0);
        assert!((pressure.sum() / pressure.len() as f64).abs() < 1e-9);
        // Time encodings stay raw
        let day_sin = data.splits.train.inputs.index_axis(ndarray::Axis(2), 2);
        assert!(day_sin.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_model4_normalizes_inputs_but_keeps_raw_labels() {
        let records = generate_records(6 * 300, 6);
        let mut config = ExperimentConfig::preset("model4").unwrap();
        config.split = Split::Fractions { train: 0.7, val: 0.15 };
        config.layers = vec![LayerSpec::lstm(4), LayerSpec::dense(1, Activation::Linear)];

        let data = config.prepare(&records).unwrap();
        assert!(!data.normalize_targets);
        let scaler = data.scaler.as_ref().unwrap();
        assert_eq!(scaler.stats().len(), 1);
        assert_eq!(scaler.stats()[0].column, 0);

        let temperature = data.splits.train.inputs.index_axis(ndarray::Axis(2), 0);
        assert!(temperature.mean().unwrap().abs() < 1e-9);

        // Labels are the raw temperature of the hour after each window
        let hourly = config.subsample.apply(&records).unwrap();
        let test = data.splits.get(Partition::Test);
        let test_start = hourly.len() - config.window_size - test.len();
        for i in 0..test.len() {
            let raw = hourly[test_start + i + config.window_size].temperature;
            assert_eq!(test.targets[[i, 0]], raw);
        }

        let model = config.build_model().unwrap();
        let report = data.report(&model, Partition::Test, 32).unwrap();
        assert_eq!(report.actuals, test.targets);
        assert_eq!(report.predictions, predict(&model, test, 32).unwrap());
    }

    #[test]
    fn test_unnormalized_preset_has_no_scaler() {
        let records = generate_records(6 * 100, 2);
        let mut config = ExperimentConfig::preset("model1").unwrap();
        config.split = Split::Fractions { train: 0.8, val: 0.1 };
        let data = config.prepare(&records).unwrap();
        assert!(data.scaler.is_none());
        assert_eq!(data.splits.train.len(), 76);
    }
}
