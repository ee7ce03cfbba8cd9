//! JSON envelope published for each sensor reading

use serde::{Deserialize, Serialize};

/// Sensor identity used for both water and temperature readings
pub const DEFAULT_SENSOR_ID: u32 = 1;

/// Wire shape: `{"sensorId": <int>, "data": "<token>"}`
///
/// Field order is fixed by declaration order, so serialization is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorEnvelope {
    #[serde(rename = "sensorId")]
    pub sensor_id: u32,
    pub data: String,
}

impl SensorEnvelope {
    pub fn build(sensor_id: u32, token: impl Into<String>) -> Self {
        Self {
            sensor_id,
            data: token.into(),
        }
    }

    /// Compact JSON text of the envelope
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
