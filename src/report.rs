use std::fmt;
use std::path::Path;

use ndarray::{s, Array2, Axis};
use serde::Serialize;

use crate::error::{ForecastError, Result};
use crate::training::EvaluationMetrics;

/// Model predictions lined up against actual values, one column per target
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionReport {
    pub target_names: Vec<String>,
    /// (samples, targets)
    pub predictions: Array2<f64>,
    /// (samples, targets)
    pub actuals: Array2<f64>,
    /// Index of the first row within the split it was cut from
    pub offset: usize,
}

/// Per-target error summary
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub metrics: EvaluationMetrics,
}

impl PredictionReport {
    pub fn new(
        target_names: Vec<String>,
        predictions: Array2<f64>,
        actuals: Array2<f64>,
    ) -> Result<Self> {
        if predictions.shape() != actuals.shape() {
            return Err(ForecastError::ShapeMismatch(format!(
                "predictions {:?} and actuals {:?} differ",
                predictions.shape(),
                actuals.shape()
            )));
        }
        if target_names.len() != predictions.ncols() {
            return Err(ForecastError::ShapeMismatch(format!(
                "{} target names for {} targets",
                target_names.len(),
                predictions.ncols()
            )));
        }
        Ok(PredictionReport {
            target_names,
            predictions,
            actuals,
            offset: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.predictions.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows `start..end`, clamped to the report
    pub fn window(&self, start: usize, end: usize) -> PredictionReport {
        let end = end.min(self.len());
        let start = start.min(end);
        PredictionReport {
            target_names: self.target_names.clone(),
            predictions: self.predictions.slice(s![start..end, ..]).to_owned(),
            actuals: self.actuals.slice(s![start..end, ..]).to_owned(),
            offset: self.offset + start,
        }
    }

    /// Error metrics over all targets together
    pub fn metrics(&self) -> EvaluationMetrics {
        EvaluationMetrics::from_predictions(&self.predictions, &self.actuals)
    }

    pub fn target_summaries(&self) -> Vec<TargetSummary> {
        self.target_names
            .iter()
            .enumerate()
            .map(|(k, name)| {
                let predictions = self.predictions.slice(s![.., k..k + 1]).to_owned();
                let actuals = self.actuals.slice(s![.., k..k + 1]).to_owned();
                TargetSummary {
                    name: name.clone(),
                    metrics: EvaluationMetrics::from_predictions(&predictions, &actuals),
                }
            })
            .collect()
    }

    /// Writes `<name> Predictions` and `<name> Actuals` columns for every target
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = Vec::with_capacity(2 * self.target_names.len());
        for name in &self.target_names {
            header.push(format!("{} Predictions", name));
            header.push(format!("{} Actuals", name));
        }
        writer.write_record(&header)?;

        let rows = self.predictions.axis_iter(Axis(0)).zip(self.actuals.axis_iter(Axis(0)));
        for (prediction, actual) in rows {
            let mut row = Vec::with_capacity(header.len());
            for (p, a) in prediction.iter().zip(actual.iter()) {
                row.push(p.to_string());
                row.push(a.to_string());
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for PredictionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>7}", "index")?;
        for name in &self.target_names {
            let predictions = format!("{} Predictions", name);
            let actuals = format!("{} Actuals", name);
            write!(f, " {:>24} {:>24}", predictions, actuals)?;
        }
        writeln!(f)?;

        for (i, (prediction, actual)) in self
            .predictions
            .axis_iter(Axis(0))
            .zip(self.actuals.axis_iter(Axis(0)))
            .enumerate()
        {
            write!(f, "{:>7}", self.offset + i)?;
            for (p, a) in prediction.iter().zip(actual.iter()) {
                write!(f, " {:>24.4} {:>24.4}", p, a)?;
            }
            writeln!(f)?;
        }

        for summary in self.target_summaries() {
            writeln!(
                f,
                "{}: mse={:.6} rmse={:.6} mae={:.6}",
                summary.name, summary.metrics.mse, summary.metrics.rmse, summary.metrics.mae
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use tempfile::tempdir;

    fn report() -> PredictionReport {
        PredictionReport::new(
            vec!["T (degC)".to_string(), "p (mbar)".to_string()],
            arr2(&[[1.0, 1000.0], [2.0, 1001.0], [3.0, 1002.0]]),
            arr2(&[[1.5, 1000.0], [2.0, 1003.0], [2.0, 1002.0]]),
        )
        .unwrap()
    }

    #[test]
    fn test_per_target_mse() {
        let summaries = report().target_summaries();
        assert_eq!(summaries.len(), 2);
        assert_abs_diff_eq!(summaries[0].metrics.mse, (0.25 + 0.0 + 1.0) / 3.0);
        assert_abs_diff_eq!(summaries[1].metrics.mse, 4.0 / 3.0);
    }

    #[test]
    fn test_window_clamps_and_tracks_offset() {
        let window = report().window(1, 100);
        assert_eq!(window.len(), 2);
        assert_eq!(window.offset, 1);
        assert_eq!(window.actuals[[0, 1]], 1003.0);
        assert!(report().window(5, 10).is_empty());
    }

    #[test]
    fn test_shape_checks() {
        let names = vec!["a".to_string()];
        assert!(PredictionReport::new(names, arr2(&[[1.0]]), arr2(&[[1.0, 2.0]])).is_err());
        assert!(PredictionReport::new(vec![], arr2(&[[1.0]]), arr2(&[[1.0]])).is_err());
    }

    #[test]
    fn test_csv_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.csv");
        report().write_csv(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            "T (degC) Predictions,T (degC) Actuals,p (mbar) Predictions,p (mbar) Actuals"
        );
        assert_eq!(lines.next().unwrap(), "1,1.5,1000,1000");
        assert_eq!(contents.lines().count(), 4);
    }

    #[test]
    fn test_display_has_header_and_summary() {
        let text = report().to_string();
        assert!(text.contains("T (degC) Predictions"));
        assert!(text.contains("p (mbar): mse="));
        assert_eq!(text.lines().count(), 1 + 3 + 2);
    }
}
