use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ForecastError, Result};

/// Where the zipped Jena climate CSV (2009-2016) is published
pub const DATASET_URL: &str =
    "https://storage.googleapis.com/tensorflow/tf-keras-datasets/jena_climate_2009_2016.csv.zip";

/// Timestamp format of the `Date Time` column
pub const DATE_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

mod date_time_format {
    use super::DATE_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &NaiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(DATE_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(s.trim(), DATE_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// One row of the Jena climate recording, sampled every 10 minutes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClimateRecord {
    #[serde(rename = "Date Time", with = "date_time_format")]
    pub date_time: NaiveDateTime,
    #[serde(rename = "p (mbar)")]
    pub pressure: f64,
    #[serde(rename = "T (degC)")]
    pub temperature: f64,
    #[serde(rename = "Tpot (K)")]
    pub potential_temperature: f64,
    #[serde(rename = "Tdew (degC)")]
    pub dew_point: f64,
    #[serde(rename = "rh (%)")]
    pub relative_humidity: f64,
    #[serde(rename = "VPmax (mbar)")]
    pub vapor_pressure_max: f64,
    #[serde(rename = "VPact (mbar)")]
    pub vapor_pressure_actual: f64,
    #[serde(rename = "VPdef (mbar)")]
    pub vapor_pressure_deficit: f64,
    #[serde(rename = "sh (g/kg)")]
    pub specific_humidity: f64,
    #[serde(rename = "H2OC (mmol/mol)")]
    pub water_vapor_concentration: f64,
    #[serde(rename = "rho (g/m**3)")]
    pub air_density: f64,
    #[serde(rename = "wv (m/s)")]
    pub wind_speed: f64,
    #[serde(rename = "max. wv (m/s)")]
    pub max_wind_speed: f64,
    #[serde(rename = "wd (deg)")]
    pub wind_direction: f64,
}

/// A measured column of [`ClimateRecord`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    Pressure,
    Temperature,
    PotentialTemperature,
    DewPoint,
    RelativeHumidity,
    VaporPressureMax,
    VaporPressureActual,
    VaporPressureDeficit,
    SpecificHumidity,
    WaterVaporConcentration,
    AirDensity,
    WindSpeed,
    MaxWindSpeed,
    WindDirection,
}

impl Measurement {
    pub const ALL: [Measurement; 14] = [
        Measurement::Pressure,
        Measurement::Temperature,
        Measurement::PotentialTemperature,
        Measurement::DewPoint,
        Measurement::RelativeHumidity,
        Measurement::VaporPressureMax,
        Measurement::VaporPressureActual,
        Measurement::VaporPressureDeficit,
        Measurement::SpecificHumidity,
        Measurement::WaterVaporConcentration,
        Measurement::AirDensity,
        Measurement::WindSpeed,
        Measurement::MaxWindSpeed,
        Measurement::WindDirection,
    ];

    pub fn value(&self, record: &ClimateRecord) -> f64 {
        match self {
            Measurement::Pressure => record.pressure,
            Measurement::Temperature => record.temperature,
            Measurement::PotentialTemperature => record.potential_temperature,
            Measurement::DewPoint => record.dew_point,
            Measurement::RelativeHumidity => record.relative_humidity,
            Measurement::VaporPressureMax => record.vapor_pressure_max,
            Measurement::VaporPressureActual => record.vapor_pressure_actual,
            Measurement::VaporPressureDeficit => record.vapor_pressure_deficit,
            Measurement::SpecificHumidity => record.specific_humidity,
            Measurement::WaterVaporConcentration => record.water_vapor_concentration,
            Measurement::AirDensity => record.air_density,
            Measurement::WindSpeed => record.wind_speed,
            Measurement::MaxWindSpeed => record.max_wind_speed,
            Measurement::WindDirection => record.wind_direction,
        }
    }

    /// Header of the column in the CSV file
    pub fn column_name(&self) -> &'static str {
        match self {
            Measurement::Pressure => "p (mbar)",
            Measurement::Temperature => "T (degC)",
            Measurement::PotentialTemperature => "Tpot (K)",
            Measurement::DewPoint => "Tdew (degC)",
            Measurement::RelativeHumidity => "rh (%)",
            Measurement::VaporPressureMax => "VPmax (mbar)",
            Measurement::VaporPressureActual => "VPact (mbar)",
            Measurement::VaporPressureDeficit => "VPdef (mbar)",
            Measurement::SpecificHumidity => "sh (g/kg)",
            Measurement::WaterVaporConcentration => "H2OC (mmol/mol)",
            Measurement::AirDensity => "rho (g/m**3)",
            Measurement::WindSpeed => "wv (m/s)",
            Measurement::MaxWindSpeed => "max. wv (m/s)",
            Measurement::WindDirection => "wd (deg)",
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for Measurement {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        Measurement::ALL
            .iter()
            .copied()
            .find(|m| m.column_name() == s)
            .ok_or_else(|| ForecastError::Config(format!("unknown measurement column '{}'", s)))
    }
}

/// Reads climate records from any CSV source with a header row
pub fn read_records<R: Read>(reader: R) -> Result<Vec<ClimateRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
    let mut records = Vec::new();
    for row in csv_reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Loads the extracted `jena_climate_2009_2016.csv`
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<ClimateRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        ForecastError::Io(std::io::Error::new(
            e.kind(),
            format!(
                "cannot open {} ({}); the dataset is published at {}",
                path.display(),
                e,
                DATASET_URL
            ),
        ))
    })?;
    let records = read_records(std::io::BufReader::new(file))?;
    info!(path = %path.display(), rows = records.len(), "loaded climate records");
    Ok(records)
}

/// Keeps every `step`-th row starting at `offset`.
///
/// The default turns 10-minute readings into hourly ones, keeping the
/// on-the-hour row of each group of six.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsample {
    pub offset: usize,
    pub step: usize,
}

impl Default for Subsample {
    fn default() -> Self {
        Subsample { offset: 5, step: 6 }
    }
}

impl Subsample {
    /// Every row
    pub fn none() -> Self {
        Subsample { offset: 0, step: 1 }
    }

    pub fn apply<T: Clone>(&self, rows: &[T]) -> Result<Vec<T>> {
        if self.step == 0 {
            return Err(ForecastError::Config("subsample step must be positive".to_string()));
        }
        let kept: Vec<T> = rows.iter().skip(self.offset).step_by(self.step).cloned().collect();
        debug!(before = rows.len(), after = kept.len(), "subsampled rows");
        Ok(kept)
    }
}
