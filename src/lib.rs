//! # climate-forecast
//!
//! Next-hour forecasting on the Jena climate recording with small recurrent
//! and convolutional networks written on top of `ndarray`.
//!
//! ## Core Components
//!
//! - **Data**: CSV records, hourly subsampling, periodic time encodings,
//!   sliding windows, train/validation/test splits and z-score normalization
//! - **Layers**: Dense, LSTM, GRU and Conv1D with full backpropagation
//! - **Models**: `Sequential` stacks built from a declarative `ModelSpec`
//! - **Training**: mini-batch training with Adam, per-epoch metrics and
//!   best-epoch checkpoints
//! - **Experiments**: the seven preset model variants, end to end
//!
//! ## Quick Start
//!
//! ```rust
//! use climate_forecast::data::split::Split;
//! use climate_forecast::data::synthetic::generate_records;
//! use climate_forecast::experiment::ExperimentConfig;
//! use climate_forecast::training::create_trainer;
//!
//! let records = generate_records(6 * 200, 0);
//! let mut config = ExperimentConfig::preset("model1").unwrap();
//! config.split = Split::Fractions { train: 0.8, val: 0.1 };
//! config.training.epochs = 1;
//!
//! let data = config.prepare(&records).unwrap();
//! let mut trainer = create_trainer(config.build_model().unwrap(), config.training.clone());
//! trainer.fit(&data.splits.train, Some(&data.splits.validation), None).unwrap();
//! ```

pub mod data;
pub mod error;
pub mod experiment;
pub mod layers;
pub mod loss;
pub mod models;
pub mod optimizers;
pub mod persistence;
pub mod report;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use data::record::{load_records, ClimateRecord, Measurement};
pub use data::scaler::StandardScaler;
pub use data::window::{make_windows, WindowedDataset};
pub use error::{ForecastError, Result};
pub use experiment::{ExperimentConfig, ExperimentOutcome};
pub use loss::{MAELoss, MSELoss};
pub use models::sequential::Sequential;
pub use models::spec::{LayerSpec, ModelSpec};
pub use optimizers::{Adam, RMSprop, SGD};
pub use persistence::{ModelMetadata, ModelPersistence, PersistentModel};
pub use report::PredictionReport;
pub use training::{ModelCheckpoint, Trainer, TrainingConfig};
