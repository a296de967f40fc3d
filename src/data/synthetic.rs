use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::data::features::{periodic, SECONDS_PER_DAY, SECONDS_PER_YEAR};
use crate::data::record::ClimateRecord;

/// Deterministic 10-minute climate readings shaped like the Jena recording.
///
/// Temperature follows a yearly and a daily cycle plus noise, pressure is a
/// mean-reverting random walk, and the humidity columns are derived from both.
/// Used for demos and tests when the real CSV is not at hand.
pub fn generate_records(rows: usize, seed: u64) -> Vec<ClimateRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut noise = |sigma: f64| -> f64 {
        let z: f64 = StandardNormal.sample(&mut rng);
        sigma * z
    };

    let start = NaiveDate::from_ymd_opt(2009, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 10, 0))
        .unwrap_or_default();

    let mut pressure: f64 = 989.0;
    let mut records = Vec::with_capacity(rows);
    for i in 0..rows {
        let date_time = start + Duration::minutes(10 * i as i64);
        let (year_sin, year_cos) = periodic(date_time, SECONDS_PER_YEAR);
        let (day_sin, _) = periodic(date_time, SECONDS_PER_DAY);

        // Coldest in January, warmest in the afternoon
        let temperature = 9.5 - 9.0 * year_cos + 1.5 * year_sin + 4.0 * day_sin + noise(0.3);
        pressure += 0.02 * (989.0 - pressure) + noise(0.15);

        let relative_humidity = (80.0 - 1.5 * (temperature - 9.5)).clamp(20.0, 100.0);
        let vapor_pressure_max = 6.1078 * (17.27 * temperature / (temperature + 237.3)).exp();
        let vapor_pressure_actual = vapor_pressure_max * relative_humidity / 100.0;
        let dew_point = {
            let gamma =
                (relative_humidity / 100.0).ln() + 17.27 * temperature / (237.3 + temperature);
            237.3 * gamma / (17.27 - gamma)
        };
        let specific_humidity =
            622.0 * vapor_pressure_actual / (pressure - 0.378 * vapor_pressure_actual);
        let wind_speed = (2.0 + noise(0.8)).abs();

        records.push(ClimateRecord {
            date_time,
            pressure,
            temperature,
            potential_temperature: temperature + 273.15 + (1000.0 - pressure) * 0.0098,
            dew_point,
            relative_humidity,
            vapor_pressure_max,
            vapor_pressure_actual,
            vapor_pressure_deficit: vapor_pressure_max - vapor_pressure_actual,
            specific_humidity,
            water_vapor_concentration: 1000.0 * vapor_pressure_actual / pressure,
            air_density: pressure * 100.0 / (287.05 * (temperature + 273.15)) * 1000.0,
            wind_speed,
            max_wind_speed: wind_speed * 1.6,
            wind_direction: (i as f64 * 7.3) % 360.0,
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_for_seed() {
        assert_eq!(generate_records(50, 3), generate_records(50, 3));
        assert_ne!(generate_records(50, 3), generate_records(50, 4));
    }

    #[test]
    fn test_ten_minute_spacing_and_plausible_values() {
        let records = generate_records(200, 1);
        assert_eq!(records.len(), 200);
        assert_eq!(records[1].date_time - records[0].date_time, Duration::minutes(10));
        assert!(records.iter().all(|r| (-30.0..45.0).contains(&r.temperature)));
        assert!(records.iter().all(|r| (940.0..1040.0).contains(&r.pressure)));
        assert!(records.iter().all(|r| r.dew_point <= r.temperature + 1e-9));
    }
}
