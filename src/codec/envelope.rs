//! JSON envelope for telemetry on pub/sub topics
//!
//! ```json
//! {"data": "10010000...", "length": 71, "timestamp": 1700000000000,
//!  "source": "relay", "address": "192.168.1.20:40112"}
//! ```
//!
//! `data` is the raw payload, hex-encoded. Producers that only have the
//! textual IMU line may send it as `text_data` instead. `address`
//! identifies the stream peer the payload arrived from so results can be
//! routed back to it.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Hex-encoded payload
    #[serde(default)]
    pub data: String,
    /// Payload length in bytes
    #[serde(default)]
    pub length: usize,
    /// Textual IMU line, used when `data` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_data: Option<String>,
    /// Wrap time in milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub address: String,
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Envelope {
    pub fn wrap(payload: &[u8], source: &str, address: &str) -> Self {
        Self {
            data: hex::encode(payload),
            length: payload.len(),
            text_data: None,
            timestamp: now_ms(),
            source: source.to_string(),
            address: address.to_string(),
        }
    }

    /// Decode the hex payload, checking it against `length`
    pub fn payload(&self) -> Result<Vec<u8>, DecodeError> {
        if self.data.trim().is_empty() {
            return match &self.text_data {
                Some(text) if !text.trim().is_empty() => Ok(text.as_bytes().to_vec()),
                _ => Err(DecodeError::InvalidEnvelope(
                    "no processable data found in message".to_string(),
                )),
            };
        }
        let bytes = hex::decode(self.data.trim())
            .map_err(|e| DecodeError::InvalidEnvelope(format!("bad hex data: {}", e)))?;
        if bytes.len() != self.length {
            return Err(DecodeError::InvalidEnvelope(format!(
                "length field {} does not match {} data bytes",
                self.length,
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Plain struct of strings and integers always serializes
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidEnvelope(e.to_string()))
    }

    /// True if `bytes` looks like a JSON object rather than a binary packet
    pub fn sniff(bytes: &[u8]) -> bool {
        bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|&b| b == b'{')
    }
}
