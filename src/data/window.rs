use std::ops::Range;

use ndarray::{s, Array2, Array3, Axis};

use crate::error::{ForecastError, Result};
use crate::models::sequential::Tensor;

/// Supervised samples cut from a frame with a sliding window
#[derive(Clone, Debug, PartialEq)]
pub struct WindowedDataset {
    /// (samples, timesteps, features)
    pub inputs: Array3<f64>,
    /// (samples, targets)
    pub targets: Array2<f64>,
    /// Frame columns the targets were taken from
    pub target_columns: Vec<usize>,
}

/// Slides a window of `window_size` rows over `frame`.
///
/// Sample `i` takes rows `i..i + window_size` as input and row
/// `i + window_size`, restricted to `target_columns`, as its label, so a frame
/// of `n` rows yields exactly `n - window_size` samples.
pub fn make_windows(
    frame: &Array2<f64>,
    window_size: usize,
    target_columns: &[usize],
) -> Result<WindowedDataset> {
    let (rows, features) = frame.dim();
    if window_size == 0 {
        return Err(ForecastError::Config("window size must be positive".to_string()));
    }
    if rows <= window_size {
        return Err(ForecastError::InsufficientData(format!(
            "{} rows cannot fill a window of {} plus a label",
            rows, window_size
        )));
    }
    if target_columns.is_empty() {
        return Err(ForecastError::Config("at least one target column is required".to_string()));
    }
    if let Some(&bad) = target_columns.iter().find(|&&c| c >= features) {
        return Err(ForecastError::Config(format!(
            "target column {} out of range for {} features",
            bad, features
        )));
    }

    let samples = rows - window_size;
    let inputs =
        Array3::from_shape_fn((samples, window_size, features), |(i, t, f)| frame[[i + t, f]]);
    let targets = Array2::from_shape_fn((samples, target_columns.len()), |(i, k)| {
        frame[[i + window_size, target_columns[k]]]
    });

    Ok(WindowedDataset {
        inputs,
        targets,
        target_columns: target_columns.to_vec(),
    })
}

impl WindowedDataset {
    pub fn len(&self) -> usize {
        self.inputs.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timesteps(&self) -> usize {
        self.inputs.len_of(Axis(1))
    }

    pub fn features(&self) -> usize {
        self.inputs.len_of(Axis(2))
    }

    pub fn n_targets(&self) -> usize {
        self.targets.ncols()
    }

    /// Samples in `range`, clamped to the dataset like a slice expression
    pub fn slice(&self, range: Range<usize>) -> WindowedDataset {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        WindowedDataset {
            inputs: self.inputs.slice(s![start..end, .., ..]).to_owned(),
            targets: self.targets.slice(s![start..end, ..]).to_owned(),
            target_columns: self.target_columns.clone(),
        }
    }

    /// Gathers samples into the model layout: a sequence of (features, batch)
    /// steps and a (targets, batch) label matrix
    pub fn batch(&self, indices: &[usize]) -> (Tensor, Array2<f64>) {
        let batch = indices.len();
        let steps = (0..self.timesteps())
            .map(|t| {
                Array2::from_shape_fn((self.features(), batch), |(f, b)| {
                    self.inputs[[indices[b], t, f]]
                })
            })
            .collect();
        let targets = Array2::from_shape_fn((self.n_targets(), batch), |(k, b)| {
            self.targets[[indices[b], k]]
        });
        (Tensor::Sequence(steps), targets)
    }

    /// Batches of consecutive samples, the last one possibly shorter
    pub fn sequential_batches(&self, batch_size: usize) -> impl Iterator<Item = Vec<usize>> + '_ {
        let size = batch_size.max(1);
        let len = self.len();
        (0..len).step_by(size).map(move |start| (start..(start + size).min(len)).collect())
    }
}
