use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::layers::activation::Activation;

/// Shape of the activations flowing between layers, batch dimension omitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Sequence { timesteps: usize, features: usize },
    Vector(usize),
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Sequence { timesteps, features } => {
                write!(f, "(None, {}, {})", timesteps, features)
            }
            Shape::Vector(size) => write!(f, "(None, {})", size),
        }
    }
}

/// Declarative description of one layer in a sequential stack
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Lstm {
        units: usize,
        #[serde(default)]
        return_sequences: bool,
    },
    Gru {
        units: usize,
        #[serde(default)]
        return_sequences: bool,
    },
    Conv1d {
        filters: usize,
        kernel_size: usize,
        #[serde(default)]
        activation: Activation,
    },
    Flatten,
    Dense {
        units: usize,
        #[serde(default)]
        activation: Activation,
    },
}

impl LayerSpec {
    pub fn lstm(units: usize) -> Self {
        LayerSpec::Lstm { units, return_sequences: false }
    }

    pub fn gru(units: usize) -> Self {
        LayerSpec::Gru { units, return_sequences: false }
    }

    pub fn dense(units: usize, activation: Activation) -> Self {
        LayerSpec::Dense { units, activation }
    }

    pub fn conv1d(filters: usize, kernel_size: usize, activation: Activation) -> Self {
        LayerSpec::Conv1d { filters, kernel_size, activation }
    }

    /// Type name used in model summaries
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerSpec::Lstm { .. } => "LSTM",
            LayerSpec::Gru { .. } => "GRU",
            LayerSpec::Conv1d { .. } => "Conv1D",
            LayerSpec::Flatten => "Flatten",
            LayerSpec::Dense { .. } => "Dense",
        }
    }

    /// Output shape for the given input shape, or why the layer cannot accept it
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match (self, input) {
            (LayerSpec::Lstm { units, return_sequences }, Shape::Sequence { timesteps, .. })
            | (LayerSpec::Gru { units, return_sequences }, Shape::Sequence { timesteps, .. }) => {
                if *units == 0 {
                    return Err(ForecastError::InvalidModel(format!(
                        "{} needs at least one unit",
                        self.type_name()
                    )));
                }
                if *return_sequences {
                    Ok(Shape::Sequence { timesteps, features: *units })
                } else {
                    Ok(Shape::Vector(*units))
                }
            }
            (LayerSpec::Conv1d { filters, kernel_size, .. }, Shape::Sequence { timesteps, .. }) => {
                if *filters == 0 || *kernel_size == 0 {
                    return Err(ForecastError::InvalidModel(
                        "Conv1D needs non-zero filters and kernel size".to_string(),
                    ));
                }
                if *kernel_size > timesteps {
                    return Err(ForecastError::InvalidModel(format!(
                        "Conv1D kernel size {} exceeds sequence length {}",
                        kernel_size, timesteps
                    )));
                }
                Ok(Shape::Sequence {
                    timesteps: timesteps - kernel_size + 1,
                    features: *filters,
                })
            }
            (LayerSpec::Flatten, Shape::Sequence { timesteps, features }) => {
                Ok(Shape::Vector(timesteps * features))
            }
            (LayerSpec::Dense { units, .. }, Shape::Vector(_)) => {
                if *units == 0 {
                    return Err(ForecastError::InvalidModel(
                        "Dense needs at least one unit".to_string(),
                    ));
                }
                Ok(Shape::Vector(*units))
            }
            (spec, shape) => Err(ForecastError::InvalidModel(format!(
                "{} cannot take input of shape {}",
                spec.type_name(),
                shape
            ))),
        }
    }
}

/// A named sequential model: input shape plus an ordered layer stack
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    /// (timesteps, features)
    pub input_shape: (usize, usize),
    pub layers: Vec<LayerSpec>,
}

impl ModelSpec {
    pub fn new(
        name: impl Into<String>,
        input_shape: (usize, usize),
        layers: Vec<LayerSpec>,
    ) -> Self {
        ModelSpec {
            name: name.into(),
            input_shape,
            layers,
        }
    }

    pub fn input(&self) -> Shape {
        Shape::Sequence {
            timesteps: self.input_shape.0,
            features: self.input_shape.1,
        }
    }

    /// Validates the stack and returns the output shape of every layer
    pub fn output_shapes(&self) -> Result<Vec<Shape>> {
        let (timesteps, features) = self.input_shape;
        if timesteps == 0 || features == 0 {
            return Err(ForecastError::InvalidModel(format!(
                "input shape ({}, {}) must be non-empty",
                timesteps, features
            )));
        }
        if self.layers.is_empty() {
            return Err(ForecastError::InvalidModel(format!("model '{}' has no layers", self.name)));
        }

        let mut shapes = Vec::with_capacity(self.layers.len());
        let mut current = self.input();
        for layer in &self.layers {
            current = layer.output_shape(current)?;
            shapes.push(current);
        }

        match current {
            Shape::Vector(_) => Ok(shapes),
            shape => Err(ForecastError::InvalidModel(format!(
                "model '{}' must end in a vector output, got {}",
                self.name, shape
            ))),
        }
    }

    pub fn output_size(&self) -> Result<usize> {
        match self.output_shapes()?.last() {
            Some(Shape::Vector(size)) => Ok(*size),
            _ => Err(ForecastError::InvalidModel(format!(
                "model '{}' has no vector output",
                self.name
            ))),
        }
    }
}
