//! Result JSON emitted per processed payload
//!
//! ```json
//! {"session_id": 1000, "sequence": 1, "timestamp": 1000000,
//!  "robot_state": {"emotion": "calm", "activity": "sleeping",
//!                  "battery_level": 87, "sensor_count": 5},
//!  "sensor_data": [{"sensor_id": 0, "acceleration": {"x": 0.0, ...},
//!                   "gyroscope": {"x": 0.0, ...}}, ...],
//!  "status": "success", "movement_class": 0, "data_format": "binary"}
//! ```
//!
//! Error results carry `session_id = -1`, `sequence = -1`, emotion and
//! activity `error`, battery 0, no sensor data and a human-readable `error`.

use crate::classify::{Activity, Derived, Emotion};
use crate::codec::DataFormat;
use crate::types::{SensorBatch, SensorFrame};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStateReport {
    pub emotion: Emotion,
    pub activity: Activity,
    pub battery_level: u8,
    pub sensor_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub session_id: i64,
    pub sequence: i64,
    pub timestamp: u64,
    pub robot_state: RobotStateReport,
    #[serde(default)]
    pub sensor_data: Vec<SensorFrame>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Activity ordinal forwarded to actuators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement_class: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format: Option<DataFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Stream peer the source payload came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ClassificationResult {
    pub fn success(
        session_id: u64,
        sequence: u32,
        timestamp: u64,
        frames: &SensorBatch,
        derived: &Derived,
        format: DataFormat,
    ) -> Self {
        Self {
            session_id: session_id as i64,
            sequence: sequence as i64,
            timestamp,
            robot_state: RobotStateReport {
                emotion: derived.state.emotion,
                activity: derived.state.activity,
                battery_level: derived.battery_level.min(100),
                sensor_count: frames.len(),
            },
            sensor_data: frames.frames().to_vec(),
            status: Status::Success,
            error: None,
            movement_class: derived.state.activity.level(),
            data_format: Some(format),
            source: None,
            address: None,
        }
    }

    pub fn error(message: impl Into<String>, timestamp: u64) -> Self {
        Self {
            session_id: -1,
            sequence: -1,
            timestamp,
            robot_state: RobotStateReport {
                emotion: Emotion::Error,
                activity: Activity::Error,
                battery_level: 0,
                sensor_count: 0,
            },
            sensor_data: Vec::new(),
            status: Status::Error,
            error: Some(message.into()),
            movement_class: None,
            data_format: None,
            source: None,
            address: None,
        }
    }

    /// Echo where the source payload came from
    pub fn with_origin(mut self, source: &str, address: &str) -> Self {
        if !source.is_empty() {
            self.source = Some(source.to_string());
        }
        if !address.is_empty() {
            self.address = Some(address.to_string());
        }
        self
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Routing fields read from any result-like JSON object
///
/// Results may come from other producers on the broker, so only the fields
/// needed for the return path are required to parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResultRoute {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub movement_class: Option<u8>,
}

impl ResultRoute {
    /// Parse routing fields; non-JSON payloads route nowhere in particular
    pub fn parse(payload: &[u8]) -> Self {
        serde_json::from_slice(payload).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RobotState;
    use serde_json::Value;

    fn derived() -> Derived {
        Derived {
            state: RobotState {
                emotion: Emotion::Calm,
                activity: Activity::Sleeping,
            },
            battery_level: 87,
        }
    }

    #[test]
    fn test_success_schema() {
        let result = ClassificationResult::success(
            1000,
            1,
            1_000_000,
            &SensorBatch::zeroed(),
            &derived(),
            DataFormat::Binary,
        );
        let v: Value = serde_json::from_slice(&result.to_json()).unwrap();

        assert_eq!(v["session_id"], 1000);
        assert_eq!(v["sequence"], 1);
        assert_eq!(v["timestamp"], 1_000_000);
        assert_eq!(v["status"], "success");
        assert_eq!(v["robot_state"]["emotion"], "calm");
        assert_eq!(v["robot_state"]["activity"], "sleeping");
        assert_eq!(v["robot_state"]["battery_level"], 87);
        assert_eq!(v["robot_state"]["sensor_count"], 5);
        assert_eq!(v["sensor_data"].as_array().unwrap().len(), 5);
        assert_eq!(v["sensor_data"][3]["sensor_id"], 3);
        assert_eq!(v["sensor_data"][3]["acceleration"]["z"], 0.0);
        assert_eq!(v["movement_class"], 0);
        assert_eq!(v["data_format"], "binary");
        assert!(v.get("error").is_none());
        assert!(v.get("address").is_none());
    }

    #[test]
    fn test_error_schema() {
        let result = ClassificationResult::error("Checksum mismatch", 5)
            .with_origin("relay", "10.0.0.1:4000");
        let v: Value = serde_json::from_slice(&result.to_json()).unwrap();

        assert_eq!(v["session_id"], -1);
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "Checksum mismatch");
        assert_eq!(v["robot_state"]["emotion"], "error");
        assert_eq!(v["robot_state"]["activity"], "error");
        assert_eq!(v["robot_state"]["battery_level"], 0);
        assert_eq!(v["source"], "relay");
        assert_eq!(v["address"], "10.0.0.1:4000");
        assert!(v.get("movement_class").is_none());
    }

    #[test]
    fn test_parses_back() {
        let result = ClassificationResult::success(
            7,
            8,
            9,
            &SensorBatch::zeroed(),
            &derived(),
            DataFormat::Text,
        );
        let back: ClassificationResult = serde_json::from_slice(&result.to_json()).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_route_is_lenient() {
        let route = ResultRoute::parse(br#"{"movement_class": 3, "extra": [1, 2]}"#);
        assert_eq!(route.movement_class, Some(3));
        assert_eq!(route.address, None);
        assert_eq!(ResultRoute::parse(b"not json"), ResultRoute::default());
    }
}
