use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::data::window::WindowedDataset;
use crate::error::{ForecastError, Result};

/// Mean and population standard deviation of one frame column
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: usize,
    pub mean: f64,
    pub std: f64,
}

impl ColumnStats {
    const EPSILON: f64 = 1e-10;

    pub fn is_constant(&self) -> bool {
        self.std < Self::EPSILON
    }

    pub fn transform(&self, x: f64) -> f64 {
        if self.is_constant() {
            0.0
        } else {
            (x - self.mean) / self.std
        }
    }

    pub fn inverse_transform(&self, z: f64) -> f64 {
        if self.is_constant() {
            self.mean
        } else {
            z * self.std + self.mean
        }
    }
}

/// Z-score normalization for selected frame columns.
///
/// Statistics come from the training inputs only, pooling every window and
/// every timestep of a column. Columns without statistics pass through
/// unchanged. A label taken from frame column `c` uses the statistics of `c`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    stats: Vec<ColumnStats>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self { stats: Vec::new() }
    }

    pub fn is_fitted(&self) -> bool {
        !self.stats.is_empty()
    }

    pub fn stats(&self) -> &[ColumnStats] {
        &self.stats
    }

    pub fn column(&self, column: usize) -> Option<&ColumnStats> {
        self.stats.iter().find(|s| s.column == column)
    }

    /// Fits statistics for `columns` from (samples, timesteps, features) inputs
    pub fn fit(&mut self, inputs: &Array3<f64>, columns: &[usize]) -> Result<()> {
        let (samples, timesteps, features) = inputs.dim();
        if samples == 0 || timesteps == 0 {
            return Err(ForecastError::InsufficientData(
                "cannot fit scaler on an empty training split".to_string(),
            ));
        }

        let mut stats = Vec::with_capacity(columns.len());
        for &column in columns {
            if column >= features {
                return Err(ForecastError::Config(format!(
                    "normalized column {} out of range for {} features",
                    column, features
                )));
            }
            let values = inputs.index_axis(Axis(2), column);
            let n = values.len() as f64;
            let mean = values.sum() / n;
            let variance = values.fold(0.0, |acc, v| acc + (v - mean).powi(2)) / n;
            stats.push(ColumnStats {
                column,
                mean,
                std: variance.sqrt(),
            });
        }

        self.stats = stats;
        Ok(())
    }

    fn ensure_fitted(&self) -> Result<()> {
        if self.is_fitted() {
            Ok(())
        } else {
            Err(ForecastError::NotFitted("call fit before transforming".to_string()))
        }
    }

    fn map_inputs(
        &self,
        inputs: &Array3<f64>,
        f: impl Fn(&ColumnStats, f64) -> f64,
    ) -> Result<Array3<f64>> {
        self.ensure_fitted()?;
        let mut out = inputs.clone();
        for stats in &self.stats {
            if stats.column >= out.len_of(Axis(2)) {
                return Err(ForecastError::ShapeMismatch(format!(
                    "scaler column {} missing from {} input features",
                    stats.column,
                    out.len_of(Axis(2))
                )));
            }
            out.index_axis_mut(Axis(2), stats.column).mapv_inplace(|x| f(stats, x));
        }
        Ok(out)
    }

    fn map_targets(
        &self,
        targets: &Array2<f64>,
        target_columns: &[usize],
        f: impl Fn(&ColumnStats, f64) -> f64,
    ) -> Result<Array2<f64>> {
        self.ensure_fitted()?;
        if targets.ncols() != target_columns.len() {
            return Err(ForecastError::ShapeMismatch(format!(
                "{} target columns for {} target values per sample",
                target_columns.len(),
                targets.ncols()
            )));
        }
        let mut out = targets.clone();
        for (k, &column) in target_columns.iter().enumerate() {
            if let Some(stats) = self.column(column) {
                out.column_mut(k).mapv_inplace(|x| f(stats, x));
            }
        }
        Ok(out)
    }

    pub fn transform_inputs(&self, inputs: &Array3<f64>) -> Result<Array3<f64>> {
        self.map_inputs(inputs, ColumnStats::transform)
    }

    pub fn inverse_transform_inputs(&self, inputs: &Array3<f64>) -> Result<Array3<f64>> {
        self.map_inputs(inputs, ColumnStats::inverse_transform)
    }

    /// Normalizes (samples, targets) labels taken from `target_columns`
    pub fn transform_targets(
        &self,
        targets: &Array2<f64>,
        target_columns: &[usize],
    ) -> Result<Array2<f64>> {
        self.map_targets(targets, target_columns, ColumnStats::transform)
    }

    /// Maps normalized labels or predictions back to physical units
    pub fn inverse_transform_targets(
        &self,
        targets: &Array2<f64>,
        target_columns: &[usize],
    ) -> Result<Array2<f64>> {
        self.map_targets(targets, target_columns, ColumnStats::inverse_transform)
    }

    /// Normalized copy of a dataset; labels are normalized only when asked
    pub fn transform_dataset(
        &self,
        data: &WindowedDataset,
        normalize_targets: bool,
    ) -> Result<WindowedDataset> {
        let targets = if normalize_targets {
            self.transform_targets(&data.targets, &data.target_columns)?
        } else {
            data.targets.clone()
        };
        Ok(WindowedDataset {
            inputs: self.transform_inputs(&data.inputs)?,
            targets,
            target_columns: data.target_columns.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::window::make_windows;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{arr2, Array};

    fn frame() -> Array2<f64> {
        Array::from_shape_fn((30, 3), |(r, c)| match c {
            0 => 1000.0 + (r as f64 * 0.7).sin() * 5.0,
            1 => -5.0 + r as f64 * 0.5,
            _ => 7.0,
        })
    }

    #[test]
    fn test_pooled_statistics() {
        let data = make_windows(&arr2(&[[1.0], [2.0], [3.0], [4.0]]), 2, &[0]).unwrap();
        // Windows [1, 2] and [2, 3]
        let mut scaler = StandardScaler::new();
        scaler.fit(&data.inputs, &[0]).unwrap();

        let stats = scaler.column(0).unwrap();
        assert_abs_diff_eq!(stats.mean, 2.0);
        assert_abs_diff_eq!(stats.std, 0.5f64.sqrt());
    }

    #[test]
    fn test_round_trip() {
        let data = make_windows(&frame(), 5, &[0, 1]).unwrap();
        let mut scaler = StandardScaler::new();
        scaler.fit(&data.inputs, &[0, 1]).unwrap();

        let z = scaler.transform_inputs(&data.inputs).unwrap();
        let back = scaler.inverse_transform_inputs(&z).unwrap();
        for (a, b) in data.inputs.iter().zip(back.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }

        let zt = scaler.transform_targets(&data.targets, &data.target_columns).unwrap();
        let back = scaler.inverse_transform_targets(&zt, &data.target_columns).unwrap();
        for (a, b) in data.targets.iter().zip(back.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_normalized_column_has_zero_mean_unit_std() {
        let data = make_windows(&frame(), 5, &[1]).unwrap();
        let mut scaler = StandardScaler::new();
        scaler.fit(&data.inputs, &[1]).unwrap();
        let z = scaler.transform_inputs(&data.inputs).unwrap();

        let column = z.index_axis(Axis(2), 1);
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let var = column.fold(0.0, |acc, v| acc + (v - mean).powi(2)) / n;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);

        // Column 0 was not selected and is untouched
        assert_eq!(z.index_axis(Axis(2), 0), data.inputs.index_axis(Axis(2), 0));
    }

    #[test]
    fn test_constant_column() {
        let data = make_windows(&frame(), 5, &[2]).unwrap();
        let mut scaler = StandardScaler::new();
        scaler.fit(&data.inputs, &[2]).unwrap();
        assert!(scaler.column(2).unwrap().is_constant());

        let z = scaler.transform_targets(&data.targets, &[2]).unwrap();
        assert!(z.iter().all(|&v| v == 0.0));
        let back = scaler.inverse_transform_targets(&z, &[2]).unwrap();
        assert!(back.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_unfitted_and_bad_columns() {
        let data = make_windows(&frame(), 5, &[0]).unwrap();
        let scaler = StandardScaler::new();
        assert!(matches!(scaler.transform_inputs(&data.inputs), Err(ForecastError::NotFitted(_))));

        let mut scaler = StandardScaler::new();
        assert!(matches!(scaler.fit(&data.inputs, &[3]), Err(ForecastError::Config(_))));
        assert!(matches!(
            scaler.fit(&data.slice(0..0).inputs, &[0]),
            Err(ForecastError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_targets_follow_source_column_stats() {
        let data = make_windows(&frame(), 5, &[1, 0]).unwrap();
        let mut scaler = StandardScaler::new();
        scaler.fit(&data.inputs, &[0, 1]).unwrap();
        let z = scaler.transform_dataset(&data, true).unwrap();

        let stats = scaler.column(1).unwrap();
        assert_relative_eq!(z.targets[[0, 0]], stats.transform(data.targets[[0, 0]]));
        let raw = scaler.transform_dataset(&data, false).unwrap();
        assert_eq!(raw.targets, data.targets);
    }
}
