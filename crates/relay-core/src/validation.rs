//! Semantic validation applied to decoded records before forwarding.

use std::ops::RangeInclusive;

use thiserror::Error;

use crate::models::TelemetryRecord;

/// Accepted temperature range in degrees Celsius.
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -100.0..=100.0;

/// Accepted relative humidity range in percent.
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// Rule violated by a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Location is an empty string.
    #[error("location is empty")]
    EmptyLocation,

    /// Temperature outside [-100, 100] or not finite.
    #[error("temperature {value}°C outside accepted range")]
    TemperatureOutOfRange {
        /// The rejected reading
        value: f64,
    },

    /// Humidity outside [0, 100] or not finite.
    #[error("humidity {value}% outside accepted range")]
    HumidityOutOfRange {
        /// The rejected reading
        value: f64,
    },
}

impl TelemetryRecord {
    /// Checks the record against the forwarding rules.
    ///
    /// Rules are evaluated in order (location, temperature, humidity) and
    /// the first violation is returned. NaN never falls inside a range.
    ///
    /// # Errors
    ///
    /// Returns the first violated [`ValidationError`].
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.location.is_empty() {
            return Err(ValidationError::EmptyLocation);
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ValidationError::TemperatureOutOfRange { value: self.temperature });
        }
        if !HUMIDITY_RANGE.contains(&self.humidity) {
            return Err(ValidationError::HumidityOutOfRange { value: self.humidity });
        }
        Ok(())
    }
}

/// Returns `true` if the record may be forwarded.
pub fn validate(record: &TelemetryRecord) -> bool {
    record.check().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(location: &str, temperature: f64, humidity: f64) -> TelemetryRecord {
        TelemetryRecord {
            location: location.to_string(),
            temperature,
            humidity,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_in_range_record() {
        assert!(validate(&record("Lisbon", 22.5, 60.0)));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(validate(&record("Vostok", -100.0, 0.0)));
        assert!(validate(&record("Death Valley", 100.0, 100.0)));
    }

    #[test]
    fn empty_location_rejected() {
        assert_eq!(record("", 10.0, 50.0).check(), Err(ValidationError::EmptyLocation));
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        assert_eq!(
            record("Porto", 150.0, 50.0).check(),
            Err(ValidationError::TemperatureOutOfRange { value: 150.0 })
        );
        assert!(!validate(&record("Porto", -100.1, 50.0)));
    }

    #[test]
    fn out_of_range_humidity_rejected() {
        assert_eq!(
            record("Faro", 18.0, -0.5).check(),
            Err(ValidationError::HumidityOutOfRange { value: -0.5 })
        );
        assert!(!validate(&record("Faro", 18.0, 100.5)));
    }

    #[test]
    fn non_finite_readings_rejected() {
        assert!(!validate(&record("Braga", f64::NAN, 50.0)));
        assert!(!validate(&record("Braga", 10.0, f64::INFINITY)));
    }

    #[test]
    fn location_checked_first() {
        assert_eq!(record("", 500.0, 500.0).check(), Err(ValidationError::EmptyLocation));
    }
}
