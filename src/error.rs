use thiserror::Error;

/// Errors surfaced by data preparation, model construction, training and persistence.
#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scaler not fitted: {0}")]
    NotFitted(String),
}

impl From<serde_json::Error> for ForecastError {
    fn from(error: serde_json::Error) -> Self {
        ForecastError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(error: bincode::Error) -> Self {
        ForecastError::Serialization(error.to_string())
    }
}

impl From<ndarray::ShapeError> for ForecastError {
    fn from(error: ndarray::ShapeError) -> Self {
        ForecastError::ShapeMismatch(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
