use std::f64::consts::PI;
use std::fmt;

use chrono::{NaiveDateTime, TimeZone, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::record::{ClimateRecord, Measurement};

pub const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;
pub const SECONDS_PER_YEAR: f64 = 365.2425 * SECONDS_PER_DAY;

/// One column of a feature frame: a raw measurement or a periodic time encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Measurement(Measurement),
    DaySin,
    DayCos,
    YearSin,
    YearCos,
}

impl Column {
    pub const TEMPERATURE: Column = Column::Measurement(Measurement::Temperature);
    pub const PRESSURE: Column = Column::Measurement(Measurement::Pressure);
    pub const TIME_OF_DAY_AND_YEAR: [Column; 4] =
        [Column::DaySin, Column::DayCos, Column::YearSin, Column::YearCos];

    pub fn value(&self, record: &ClimateRecord) -> f64 {
        match self {
            Column::Measurement(m) => m.value(record),
            Column::DaySin => periodic(record.date_time, SECONDS_PER_DAY).0,
            Column::DayCos => periodic(record.date_time, SECONDS_PER_DAY).1,
            Column::YearSin => periodic(record.date_time, SECONDS_PER_YEAR).0,
            Column::YearCos => periodic(record.date_time, SECONDS_PER_YEAR).1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Column::Measurement(m) => m.column_name(),
            Column::DaySin => "Day sin",
            Column::DayCos => "Day cos",
            Column::YearSin => "Year sin",
            Column::YearCos => "Year cos",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Seconds since the UNIX epoch, reading the naive timestamp as UTC
pub fn timestamp_seconds(date_time: NaiveDateTime) -> f64 {
    Utc.from_utc_datetime(&date_time).timestamp() as f64
}

/// (sin, cos) of the position of `date_time` within a cycle of `period` seconds
pub fn periodic(date_time: NaiveDateTime, period: f64) -> (f64, f64) {
    let angle = timestamp_seconds(date_time) * (2.0 * PI / period);
    (angle.sin(), angle.cos())
}

/// Rows are records in order, columns follow `columns`
pub fn build_frame(records: &[ClimateRecord], columns: &[Column]) -> Array2<f64> {
    Array2::from_shape_fn((records.len(), columns.len()), |(row, col)| {
        columns[col].value(&records[row])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::generate_records;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2009, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_day_encoding_is_periodic() {
        let midnight = periodic(at(0, 0), SECONDS_PER_DAY);
        assert_abs_diff_eq!(midnight.0, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(midnight.1, 1.0, epsilon = 1e-9);

        let six = periodic(at(6, 0), SECONDS_PER_DAY);
        assert_abs_diff_eq!(six.0, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(six.1, 0.0, epsilon = 1e-9);

        let noon_next_day = periodic(at(12, 0) + chrono::Duration::days(1), SECONDS_PER_DAY);
        let noon = periodic(at(12, 0), SECONDS_PER_DAY);
        assert_abs_diff_eq!(noon.0, noon_next_day.0, epsilon = 1e-9);
        assert_abs_diff_eq!(noon.1, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_layout() {
        let records = generate_records(4, 0);
        let columns = [Column::PRESSURE, Column::TEMPERATURE, Column::DaySin];
        let frame = build_frame(&records, &columns);

        assert_eq!(frame.shape(), &[4, 3]);
        assert_eq!(frame[[2, 0]], records[2].pressure);
        assert_eq!(frame[[3, 1]], records[3].temperature);
        let encoded = frame[[1, 2]];
        assert!((-1.0..=1.0).contains(&encoded));
    }

    #[test]
    fn test_column_json() {
        let columns = vec![Column::TEMPERATURE, Column::YearCos];
        let json = serde_json::to_string(&columns).unwrap();
        assert_eq!(json, r#"[{"measurement":"temperature"},"year_cos"]"#);
        assert_eq!(Column::TEMPERATURE.to_string(), "T (degC)");
    }
}
