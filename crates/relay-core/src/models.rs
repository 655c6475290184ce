//! Telemetry record model and JSON wire format.
//!
//! Producers in the field emit two slightly different schemas (one with
//! `precipitationProbability` and `condition`, one with `precipitation`,
//! `weatherDescription` and a few extra readings). `TelemetryRecord` accepts
//! the union of both. Fields that only one schema carries are optional and
//! are written back out only when present, so a record is forwarded in the
//! same shape it arrived in.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// A single weather observation consumed from the queue.
///
/// Unknown fields are ignored. Missing or `null` fields take their zero
/// value; semantic checks are left to [`TelemetryRecord::check`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Human-readable location name.
    #[serde(deserialize_with = "null_as_default")]
    pub location: String,
    /// Latitude in decimal degrees.
    #[serde(deserialize_with = "null_as_default")]
    pub latitude: f64,
    /// Longitude in decimal degrees.
    #[serde(deserialize_with = "null_as_default")]
    pub longitude: f64,
    /// Air temperature in degrees Celsius.
    #[serde(deserialize_with = "null_as_default")]
    pub temperature: f64,
    /// Relative humidity in percent.
    #[serde(deserialize_with = "null_as_default")]
    pub humidity: f64,
    /// Wind speed.
    #[serde(deserialize_with = "null_as_default")]
    pub wind_speed: f64,
    /// Numeric weather condition code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_code: Option<i64>,
    /// Short condition label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Longer weather description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_description: Option<String>,
    /// Precipitation amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precipitation: Option<f64>,
    /// Precipitation probability in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precipitation_probability: Option<f64>,
    /// Apparent ("feels like") temperature in degrees Celsius.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparent_temperature: Option<f64>,
    /// Cloud cover in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<f64>,
    /// Atmospheric pressure.
    #[serde(deserialize_with = "null_as_default")]
    pub pressure: f64,
    /// Observation time as sent by the producer.
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: String,
    /// Time the collector picked the observation up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<String>,
}

impl TelemetryRecord {
    /// Decodes a record from a raw message body.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` if the body is not JSON or a field has
    /// the wrong type.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Serializes the record into the body sent to the ingestion API.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Producers forward upstream readings verbatim, so any of them may be
/// `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn decodes_camel_case_fields() {
        let body = br#"{"location":"Lisbon","windSpeed":12.5,"weatherCode":3,"temperature":22.5}"#;

        let record = TelemetryRecord::from_json(body).unwrap();

        assert_eq!(record.location, "Lisbon");
        assert_eq!(record.wind_speed, 12.5);
        assert_eq!(record.weather_code, Some(3));
        assert_eq!(record.temperature, 22.5);
    }

    #[test]
    fn missing_fields_take_zero_values() {
        let record = TelemetryRecord::from_json(b"{}").unwrap();

        assert_eq!(record, TelemetryRecord::default());
        assert!(record.location.is_empty());
        assert_eq!(record.humidity, 0.0);
        assert!(record.timestamp.is_empty());
    }

    #[test]
    fn null_readings_take_zero_values() {
        let body = br#"{"location":"Lisbon","temperature":22.5,"humidity":60,"windSpeed":null,"pressure":null,"timestamp":null}"#;

        let record = TelemetryRecord::from_json(body).unwrap();

        assert_eq!(record.location, "Lisbon");
        assert_eq!(record.temperature, 22.5);
        assert_eq!(record.wind_speed, 0.0);
        assert_eq!(record.pressure, 0.0);
        assert!(record.timestamp.is_empty());
    }

    #[test]
    fn null_location_decodes_as_empty() {
        let record =
            TelemetryRecord::from_json(br#"{"location":null,"latitude":null,"cloudCover":null}"#)
                .unwrap();

        assert!(record.location.is_empty());
        assert_eq!(record.latitude, 0.0);
        assert_eq!(record.cloud_cover, None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let body = br#"{"location":"Porto","sensorId":"abc","nested":{"x":1}}"#;

        let record = TelemetryRecord::from_json(body).unwrap();
        assert_eq!(record.location, "Porto");
    }

    #[test]
    fn wrong_field_type_fails_to_decode() {
        let err = TelemetryRecord::from_json(br#"{"temperature":"hot"}"#).unwrap_err();
        assert!(err.is_decode());

        let err = TelemetryRecord::from_json(b"not json").unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn absent_optional_fields_are_not_written() {
        let record = TelemetryRecord {
            location: "Faro".to_string(),
            precipitation_probability: Some(40.0),
            ..Default::default()
        };

        let value: Value = serde_json::from_slice(&record.to_json().unwrap()).unwrap();

        assert_eq!(value["precipitationProbability"], json!(40.0));
        assert!(value.get("precipitation").is_none());
        assert!(value.get("weatherDescription").is_none());
        // Core readings are always present.
        assert_eq!(value["humidity"], json!(0.0));
    }
}
