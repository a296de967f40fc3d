use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::layers::conv1d::{Conv1DCache, Conv1DGradients, Conv1DLayer};
use crate::layers::gru_cell::{GRUCellCache, GRUCellGradients};
use crate::layers::linear::{LinearCache, LinearGradients, LinearLayer};
use crate::layers::lstm_cell::{LSTMCellCache, LSTMCellGradients};
use crate::models::recurrent::{GRULayer, LSTMLayer};
use crate::models::spec::{LayerSpec, ModelSpec, Shape};
use crate::optimizers::Optimizer;

/// Activations passed between layers; every matrix holds one column per sample.
#[derive(Clone, Debug, PartialEq)]
pub enum Tensor {
    /// One (features, batch) matrix per timestep
    Sequence(Vec<Array2<f64>>),
    /// (features, batch)
    Vector(Array2<f64>),
}

impl Tensor {
    pub fn batch_size(&self) -> usize {
        match self {
            Tensor::Sequence(steps) => steps.first().map(|x| x.ncols()).unwrap_or(0),
            Tensor::Vector(x) => x.ncols(),
        }
    }

    fn into_sequence(self, layer: &str) -> Result<Vec<Array2<f64>>> {
        match self {
            Tensor::Sequence(steps) => Ok(steps),
            Tensor::Vector(_) => Err(ForecastError::ShapeMismatch(format!(
                "{} expects a sequence input",
                layer
            ))),
        }
    }

    fn into_vector(self, layer: &str) -> Result<Array2<f64>> {
        match self {
            Tensor::Vector(x) => Ok(x),
            Tensor::Sequence(_) => Err(ForecastError::ShapeMismatch(format!(
                "{} expects a vector input",
                layer
            ))),
        }
    }
}

/// A built layer with its trainable parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Lstm(LSTMLayer),
    Gru(GRULayer),
    Conv1d(Conv1DLayer),
    Flatten,
    Dense(LinearLayer),
}

/// Forward-pass values a layer needs for its backward pass
#[derive(Clone, Debug)]
pub enum LayerCache {
    Lstm(Vec<LSTMCellCache>),
    Gru(Vec<GRUCellCache>),
    Conv1d(Conv1DCache),
    Flatten { timesteps: usize, features: usize },
    Dense(LinearCache),
}

#[derive(Clone, Debug)]
pub enum LayerGradients {
    Lstm(LSTMCellGradients),
    Gru(GRUCellGradients),
    Conv1d(Conv1DGradients),
    Flatten,
    Dense(LinearGradients),
}

impl LayerGradients {
    /// Every gradient matrix, for clipping and inspection
    pub fn matrices_mut(&mut self) -> Vec<&mut Array2<f64>> {
        match self {
            LayerGradients::Lstm(g) => g.matrices_mut(),
            LayerGradients::Gru(g) => g.matrices_mut(),
            LayerGradients::Conv1d(g) => vec![&mut g.weight, &mut g.bias],
            LayerGradients::Flatten => Vec::new(),
            LayerGradients::Dense(g) => vec![&mut g.weight, &mut g.bias],
        }
    }
}

impl Layer {
    fn build<R: Rng + ?Sized>(spec: &LayerSpec, input: Shape, rng: &mut R) -> Result<Layer> {
        let features = match input {
            Shape::Sequence { features, .. } => features,
            Shape::Vector(size) => size,
        };
        // Validates the pairing before any weights are drawn
        spec.output_shape(input)?;

        Ok(match spec {
            LayerSpec::Lstm { units, return_sequences } => {
                Layer::Lstm(LSTMLayer::new(features, *units, *return_sequences, rng))
            }
            LayerSpec::Gru { units, return_sequences } => {
                Layer::Gru(GRULayer::new(features, *units, *return_sequences, rng))
            }
            LayerSpec::Conv1d { filters, kernel_size, activation } => {
                Layer::Conv1d(Conv1DLayer::new(features, *filters, *kernel_size, *activation, rng))
            }
            LayerSpec::Flatten => Layer::Flatten,
            LayerSpec::Dense { units, activation } => {
                Layer::Dense(LinearLayer::new(features, *units, *activation, rng))
            }
        })
    }

    pub fn spec(&self) -> LayerSpec {
        match self {
            Layer::Lstm(layer) => LayerSpec::Lstm {
                units: layer.units(),
                return_sequences: layer.return_sequences,
            },
            Layer::Gru(layer) => LayerSpec::Gru {
                units: layer.units(),
                return_sequences: layer.return_sequences,
            },
            Layer::Conv1d(layer) => LayerSpec::Conv1d {
                filters: layer.filters,
                kernel_size: layer.kernel_size,
                activation: layer.activation,
            },
            Layer::Flatten => LayerSpec::Flatten,
            Layer::Dense(layer) => LayerSpec::Dense {
                units: layer.output_size,
                activation: layer.activation,
            },
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Layer::Lstm(layer) => layer.num_parameters(),
            Layer::Gru(layer) => layer.num_parameters(),
            Layer::Conv1d(layer) => layer.num_parameters(),
            Layer::Flatten => 0,
            Layer::Dense(layer) => layer.num_parameters(),
        }
    }

    /// Trainable matrices, in the order of [`LayerGradients::matrices_mut`]
    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        match self {
            Layer::Lstm(layer) => {
                let cell = &mut layer.cell;
                vec![&mut cell.w_ih, &mut cell.w_hh, &mut cell.bias]
            }
            Layer::Gru(layer) => {
                let c = &mut layer.cell;
                vec![
                    &mut c.w_ir,
                    &mut c.w_hr,
                    &mut c.b_ir,
                    &mut c.b_hr,
                    &mut c.w_iz,
                    &mut c.w_hz,
                    &mut c.b_iz,
                    &mut c.b_hz,
                    &mut c.w_in,
                    &mut c.w_hn,
                    &mut c.b_in,
                    &mut c.b_hn,
                ]
            }
            Layer::Conv1d(layer) => vec![&mut layer.weight, &mut layer.bias],
            Layer::Flatten => Vec::new(),
            Layer::Dense(layer) => vec![&mut layer.weight, &mut layer.bias],
        }
    }

    pub fn forward_with_cache(&self, input: Tensor) -> Result<(Tensor, LayerCache)> {
        match self {
            Layer::Lstm(layer) => {
                let sequence = input.into_sequence("LSTM")?;
                let (mut outputs, caches) = layer.forward_sequence_with_cache(&sequence);
                let output = if layer.return_sequences {
                    Tensor::Sequence(outputs)
                } else {
                    Tensor::Vector(last_step(&mut outputs, "LSTM")?)
                };
                Ok((output, LayerCache::Lstm(caches)))
            }
            Layer::Gru(layer) => {
                let sequence = input.into_sequence("GRU")?;
                let (mut outputs, caches) = layer.forward_sequence_with_cache(&sequence);
                let output = if layer.return_sequences {
                    Tensor::Sequence(outputs)
                } else {
                    Tensor::Vector(last_step(&mut outputs, "GRU")?)
                };
                Ok((output, LayerCache::Gru(caches)))
            }
            Layer::Conv1d(layer) => {
                let sequence = input.into_sequence("Conv1D")?;
                let (outputs, cache) = layer.forward_with_cache(&sequence)?;
                Ok((Tensor::Sequence(outputs), LayerCache::Conv1d(cache)))
            }
            Layer::Flatten => {
                let sequence = input.into_sequence("Flatten")?;
                let features = sequence.first().map(|x| x.nrows()).unwrap_or(0);
                let views: Vec<ArrayView2<f64>> = sequence.iter().map(|x| x.view()).collect();
                let flat = concatenate(Axis(0), &views)?;
                Ok((
                    Tensor::Vector(flat),
                    LayerCache::Flatten {
                        timesteps: sequence.len(),
                        features,
                    },
                ))
            }
            Layer::Dense(layer) => {
                let vector = input.into_vector("Dense")?;
                let (output, cache) = layer.forward_with_cache(&vector);
                Ok((Tensor::Vector(output), LayerCache::Dense(cache)))
            }
        }
    }

    /// Returns parameter gradients and the gradient with respect to the layer input
    pub fn backward(
        &self,
        grad_output: Tensor,
        cache: &LayerCache,
    ) -> Result<(LayerGradients, Tensor)> {
        match (self, cache) {
            (Layer::Lstm(layer), LayerCache::Lstm(caches)) => {
                let grad_hidden = expand_to_steps(grad_output, caches.len(), layer.units())?;
                let (gradients, grad_inputs) = layer.backward_sequence(&grad_hidden, caches);
                Ok((LayerGradients::Lstm(gradients), Tensor::Sequence(grad_inputs)))
            }
            (Layer::Gru(layer), LayerCache::Gru(caches)) => {
                let grad_hidden = expand_to_steps(grad_output, caches.len(), layer.units())?;
                let (gradients, grad_inputs) = layer.backward_sequence(&grad_hidden, caches);
                Ok((LayerGradients::Gru(gradients), Tensor::Sequence(grad_inputs)))
            }
            (Layer::Conv1d(layer), LayerCache::Conv1d(conv_cache)) => {
                let grad_outputs = grad_output.into_sequence("Conv1D")?;
                let (gradients, grad_inputs) = layer.backward(&grad_outputs, conv_cache);
                Ok((LayerGradients::Conv1d(gradients), Tensor::Sequence(grad_inputs)))
            }
            (Layer::Flatten, LayerCache::Flatten { timesteps, features }) => {
                let grad = grad_output.into_vector("Flatten")?;
                let steps = (0..*timesteps)
                    .map(|t| grad.slice(s![t * features..(t + 1) * features, ..]).to_owned())
                    .collect();
                Ok((LayerGradients::Flatten, Tensor::Sequence(steps)))
            }
            (Layer::Dense(layer), LayerCache::Dense(dense_cache)) => {
                let grad = grad_output.into_vector("Dense")?;
                let (gradients, grad_input) = layer.backward(&grad, dense_cache);
                Ok((LayerGradients::Dense(gradients), Tensor::Vector(grad_input)))
            }
            _ => Err(ForecastError::ShapeMismatch(
                "layer cache does not match layer kind".to_string(),
            )),
        }
    }

    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &LayerGradients,
        optimizer: &mut O,
        prefix: &str,
    ) {
        match (self, gradients) {
            (Layer::Lstm(layer), LayerGradients::Lstm(g)) => {
                layer.update_parameters(g, optimizer, prefix)
            }
            (Layer::Gru(layer), LayerGradients::Gru(g)) => {
                layer.update_parameters(g, optimizer, prefix)
            }
            (Layer::Conv1d(layer), LayerGradients::Conv1d(g)) => {
                layer.update_parameters(g, optimizer, prefix)
            }
            (Layer::Dense(layer), LayerGradients::Dense(g)) => {
                layer.update_parameters(g, optimizer, prefix)
            }
            _ => {}
        }
    }
}

fn last_step(outputs: &mut Vec<Array2<f64>>, layer: &str) -> Result<Array2<f64>> {
    outputs
        .pop()
        .ok_or_else(|| {
            ForecastError::ShapeMismatch(format!("{} received an empty sequence", layer))
        })
}

/// Spreads a last-step gradient over a window, zero for all earlier steps
fn expand_to_steps(
    grad_output: Tensor,
    timesteps: usize,
    units: usize,
) -> Result<Vec<Array2<f64>>> {
    match grad_output {
        Tensor::Sequence(steps) => {
            if steps.len() != timesteps {
                return Err(ForecastError::ShapeMismatch(format!(
                    "expected gradients for {} steps, got {}",
                    timesteps,
                    steps.len()
                )));
            }
            Ok(steps)
        }
        Tensor::Vector(last) => {
            let mut steps = vec![Array2::zeros((units, last.ncols())); timesteps.saturating_sub(1)];
            steps.push(last);
            Ok(steps)
        }
    }
}

/// A stack of layers applied one after the other, the native counterpart of a
/// Keras `Sequential` model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sequential {
    pub name: String,
    /// (timesteps, features)
    pub input_shape: (usize, usize),
    layers: Vec<Layer>,
}

impl Sequential {
    /// Builds a model from its `ModelSpec` with weights drawn from a seeded generator
    pub fn from_spec(spec: &ModelSpec, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_spec_with_rng(spec, &mut rng)
    }

    pub fn from_spec_with_rng<R: Rng + ?Sized>(spec: &ModelSpec, rng: &mut R) -> Result<Self> {
        let shapes = spec.output_shapes()?;
        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut input = spec.input();

        for (layer_spec, output) in spec.layers.iter().zip(shapes) {
            layers.push(Layer::build(layer_spec, input, rng)?);
            input = output;
        }

        Ok(Sequential {
            name: spec.name.clone(),
            input_shape: spec.input_shape,
            layers,
        })
    }

    pub fn spec(&self) -> ModelSpec {
        let layers = self.layers.iter().map(Layer::spec).collect();
        ModelSpec::new(self.name.clone(), self.input_shape, layers)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn output_size(&self) -> Result<usize> {
        self.spec().output_size()
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(Layer::num_parameters).sum()
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let (timesteps, features) = self.input_shape;
        match input {
            Tensor::Sequence(steps) => {
                if steps.len() != timesteps {
                    return Err(ForecastError::ShapeMismatch(format!(
                        "model '{}' expects {} timesteps, got {}",
                        self.name,
                        timesteps,
                        steps.len()
                    )));
                }
                let batch = input.batch_size();
                let mismatched = |x: &&Array2<f64>| x.nrows() != features || x.ncols() != batch;
                if let Some(bad) = steps.iter().find(mismatched) {
                    return Err(ForecastError::ShapeMismatch(format!(
                        "model '{}' expects ({}, {}) per step, got {:?}",
                        self.name,
                        features,
                        batch,
                        bad.shape()
                    )));
                }
                Ok(())
            }
            Tensor::Vector(_) => Err(ForecastError::ShapeMismatch(format!(
                "model '{}' expects a sequence input",
                self.name
            ))),
        }
    }

    /// Inference pass; returns (outputs, batch)
    pub fn forward(&self, input: &Tensor) -> Result<Array2<f64>> {
        Ok(self.forward_with_cache(input)?.0)
    }

    pub fn forward_with_cache(&self, input: &Tensor) -> Result<(Array2<f64>, Vec<LayerCache>)> {
        self.check_input(input)?;

        let mut current = input.clone();
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (output, cache) = layer.forward_with_cache(current)?;
            caches.push(cache);
            current = output;
        }

        Ok((current.into_vector("model output")?, caches))
    }

    /// Backward pass through all layers in reverse order
    pub fn backward(
        &self,
        grad_output: &Array2<f64>,
        caches: &[LayerCache],
    ) -> Result<Vec<LayerGradients>> {
        if caches.len() != self.layers.len() {
            return Err(ForecastError::ShapeMismatch(format!(
                "expected {} layer caches, got {}",
                self.layers.len(),
                caches.len()
            )));
        }

        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut grad = Tensor::Vector(grad_output.clone());
        for (layer, cache) in self.layers.iter().zip(caches).rev() {
            let (layer_gradients, grad_input) = layer.backward(grad, cache)?;
            gradients.push(layer_gradients);
            grad = grad_input;
        }

        gradients.reverse();
        Ok(gradients)
    }

    /// Update parameters for all layers using computed gradients
    pub fn update_parameters<O: Optimizer + ?Sized>(
        &mut self,
        gradients: &[LayerGradients],
        optimizer: &mut O,
    ) {
        for (i, (layer, layer_gradients)) in self.layers.iter_mut().zip(gradients).enumerate() {
            let prefix = format!("layer_{}", i);
            layer.update_parameters(layer_gradients, optimizer, &prefix);
        }
    }

    /// Keras-style table of layers, output shapes and parameter counts
    pub fn summary(&self) -> String {
        let spec = self.spec();
        let shapes = spec.output_shapes().unwrap_or_default();
        let rule = "_".repeat(65);
        let double_rule = "=".repeat(65);

        let mut lines = vec![
            format!("Model: \"{}\"", self.name),
            rule.clone(),
            format!(" {:<28}{:<26}{}", "Layer (type)", "Output Shape", "Param #"),
            double_rule.clone(),
        ];

        let mut counts = std::collections::HashMap::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_spec = layer.spec();
            let type_name = layer_spec.type_name();
            let base = type_name.to_ascii_lowercase();
            let seen = counts.entry(base.clone()).or_insert(0usize);
            let label = if *seen == 0 { base } else { format!("{}_{}", base, seen) };
            *seen += 1;

            let shape = shapes.get(i).map(|s| s.to_string()).unwrap_or_default();
            lines.push(format!(
                " {:<28}{:<26}{}",
                format!("{} ({})", label, type_name),
                shape,
                group_thousands(layer.num_parameters())
            ));
        }

        lines.push(double_rule);
        lines.push(format!("Total params: {}", group_thousands(self.num_parameters())));
        lines.push(format!("Trainable params: {}", group_thousands(self.num_parameters())));
        lines.push("Non-trainable params: 0".to_string());
        lines.push(rule);
        lines.join("\n")
    }
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::activation::Activation;

    fn model1_spec() -> ModelSpec {
        ModelSpec::new(
            "model1",
            (5, 1),
            vec![
                LayerSpec::lstm(64),
                LayerSpec::dense(8, Activation::Relu),
                LayerSpec::dense(1, Activation::Linear),
            ],
        )
    }

    fn batch(timesteps: usize, features: usize, batch: usize) -> Tensor {
        Tensor::Sequence(
            (0..timesteps)
                .map(|t| {
                    Array2::from_shape_fn((features, batch), |(f, b)| {
                        ((t + f + b) as f64 * 0.37).sin()
                    })
                })
                .collect(),
        )
    }

    #[test]
    fn test_keras_parameter_counts() {
        let model = Sequential::from_spec(&model1_spec(), 0).unwrap();
        assert_eq!(model.num_parameters(), 17_425);

        let model6 = ModelSpec::new(
            "model6",
            (7, 6),
            vec![
                LayerSpec::Lstm { units: 32, return_sequences: true },
                LayerSpec::lstm(64),
                LayerSpec::dense(8, Activation::Relu),
                LayerSpec::dense(2, Activation::Linear),
            ],
        );
        let model = Sequential::from_spec(&model6, 0).unwrap();
        // 4*32*(6+32+1) + 4*64*(32+64+1) + 64*8+8 + 8*2+2
        assert_eq!(model.num_parameters(), 4_992 + 24_832 + 520 + 18);
    }

    #[test]
    fn test_forward_output_shape() {
        let model = Sequential::from_spec(&model1_spec(), 1).unwrap();
        let output = model.forward(&batch(5, 1, 4)).unwrap();
        assert_eq!(output.shape(), &[1, 4]);
    }

    #[test]
    fn test_forward_rejects_wrong_window() {
        let model = Sequential::from_spec(&model1_spec(), 1).unwrap();
        assert!(matches!(model.forward(&batch(6, 1, 2)), Err(ForecastError::ShapeMismatch(_))));
        assert!(matches!(model.forward(&batch(5, 2, 2)), Err(ForecastError::ShapeMismatch(_))));
    }

    #[test]
    fn test_same_seed_same_weights() {
        let a = Sequential::from_spec(&model1_spec(), 42).unwrap();
        let b = Sequential::from_spec(&model1_spec(), 42).unwrap();
        let input = batch(5, 1, 3);
        assert_eq!(a.forward(&input).unwrap(), b.forward(&input).unwrap());
    }

    #[test]
    fn test_spec_round_trip() {
        let spec = model1_spec();
        let model = Sequential::from_spec(&spec, 3).unwrap();
        assert_eq!(model.spec(), spec);
    }

    #[test]
    fn test_backward_produces_gradient_per_layer() {
        let spec = ModelSpec::new(
            "conv",
            (7, 6),
            vec![
                LayerSpec::conv1d(4, 2, Activation::Relu),
                LayerSpec::Flatten,
                LayerSpec::dense(3, Activation::Relu),
                LayerSpec::dense(2, Activation::Linear),
            ],
        );
        let model = Sequential::from_spec(&spec, 5).unwrap();
        let (output, caches) = model.forward_with_cache(&batch(7, 6, 3)).unwrap();
        let gradients = model.backward(&Array2::ones(output.raw_dim()), &caches).unwrap();
        assert_eq!(gradients.len(), 4);
        assert!(matches!(gradients[1], LayerGradients::Flatten));
    }

    #[test]
    fn test_summary_lists_layers() {
        let model = Sequential::from_spec(&model1_spec(), 0).unwrap();
        let summary = model.summary();
        assert!(summary.contains("lstm (LSTM)"));
        assert!(summary.contains("dense (Dense)"));
        assert!(summary.contains("dense_1 (Dense)"));
        assert!(summary.contains("(None, 64)"));
        assert!(summary.contains("Total params: 17,425"));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(16_896), "16,896");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }
}
