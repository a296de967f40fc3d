use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::data::window::WindowedDataset;
use crate::error::{ForecastError, Result};

/// How windowed samples are partitioned into train, validation and test.
///
/// Ranges are contiguous and in time order; nothing is shuffled across splits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    /// `[0, train_end)`, `[train_end, val_end)` and the rest, clamped to the data
    Indices { train_end: usize, val_end: usize },
    /// Leading fractions for train and validation, the remainder is test
    Fractions { train: f64, val: f64 },
}

impl Default for Split {
    fn default() -> Self {
        Split::Indices {
            train_end: 60_000,
            val_end: 65_000,
        }
    }
}

/// Which partition of a [`Splits`] to use
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl std::str::FromStr for Partition {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Partition::Train),
            "val" | "validation" => Ok(Partition::Validation),
            "test" => Ok(Partition::Test),
            other => Err(ForecastError::Config(format!("unknown split '{}'", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Splits {
    pub train: WindowedDataset,
    pub validation: WindowedDataset,
    pub test: WindowedDataset,
}

impl Splits {
    pub fn get(&self, partition: Partition) -> &WindowedDataset {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }
}

impl Split {
    /// Sample ranges for a dataset of `len` samples
    pub fn ranges(&self, len: usize) -> Result<(Range<usize>, Range<usize>, Range<usize>)> {
        let (train_end, val_end) = match *self {
            Split::Indices { train_end, val_end } => {
                if val_end < train_end {
                    return Err(ForecastError::Config(format!(
                        "validation end {} precedes training end {}",
                        val_end, train_end
                    )));
                }
                (train_end, val_end)
            }
            Split::Fractions { train, val } => {
                let in_unit = |x: f64| (0.0..=1.0).contains(&x);
                if !in_unit(train) || !in_unit(val) || train + val > 1.0 {
                    return Err(ForecastError::Config(format!(
                        "split fractions train={} val={} must lie in [0, 1] and sum to at most 1",
                        train, val
                    )));
                }
                let train_end = (len as f64 * train).round() as usize;
                let val_end = (len as f64 * (train + val)).round() as usize;
                (train_end, val_end)
            }
        };

        let train_end = train_end.min(len);
        let val_end = val_end.min(len);
        if train_end == 0 {
            return Err(ForecastError::InsufficientData(format!(
                "training split of {} samples is empty",
                len
            )));
        }
        Ok((0..train_end, train_end..val_end, val_end..len))
    }

    pub fn apply(&self, data: &WindowedDataset) -> Result<Splits> {
        let (train, validation, test) = self.ranges(data.len())?;
        Ok(Splits {
            train: data.slice(train),
            validation: data.slice(validation),
            test: data.slice(test),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ranges_on_full_dataset() {
        let (train, val, test) = Split::default().ranges(70_086).unwrap();
        assert_eq!(train, 0..60_000);
        assert_eq!(val, 60_000..65_000);
        assert_eq!(test, 65_000..70_086);
    }

    #[test]
    fn test_index_ranges_clamp() {
        let (train, val, test) = Split::default().ranges(61_000).unwrap();
        assert_eq!(train, 0..60_000);
        assert_eq!(val, 60_000..61_000);
        assert!(test.is_empty());

        let (train, val, test) = Split::default().ranges(100).unwrap();
        assert_eq!(train.len(), 100);
        assert!(val.is_empty() && test.is_empty());
    }

    #[test]
    fn test_fraction_ranges() {
        let (train, val, test) = Split::Fractions { train: 0.7, val: 0.2 }.ranges(100).unwrap();
        assert_eq!((train.len(), val.len(), test.len()), (70, 20, 10));
        assert!(Split::Fractions { train: 0.9, val: 0.2 }.ranges(100).is_err());
    }

    #[test]
    fn test_empty_training_split() {
        assert!(matches!(
            Split::Fractions { train: 0.0, val: 0.5 }.ranges(100),
            Err(ForecastError::InsufficientData(_))
        ));
        assert!(Split::Indices { train_end: 10, val_end: 5 }.ranges(100).is_err());
    }

    #[test]
    fn test_partition_names() {
        assert_eq!("test".parse::<Partition>().unwrap(), Partition::Test);
        assert_eq!("val".parse::<Partition>().unwrap(), Partition::Validation);
        assert!("holdout".parse::<Partition>().is_err());
    }
}
