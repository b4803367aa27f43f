//! Packet codec
//!
//! Three payload layouts carry the same five-unit sensor batch:
//!
//! | Layout | Size | Header | Integrity |
//! |--------|------|--------|-----------|
//! | [`packet`] checksummed | 71 bytes | type, sequence, timestamp | CRC-16/CCITT-FALSE |
//! | [`float_batch`] | 120 bytes | none | length only |
//! | [`text`] | variable | none | lenient parse |
//!
//! Layouts carry no shared discriminator, so each link names its
//! [`CodecVariant`]. `auto` picks by exact length (71 or 120) and falls
//! back to text for anything else.
//!
//! The codec is transport-agnostic: the same bytes decode identically
//! whether they arrived length-prefixed on a stream or on a topic.

pub mod crc;
pub mod envelope;
pub mod float_batch;
pub mod packet;
pub mod text;

pub use crc::crc16_ccitt_false;
pub use envelope::Envelope;

use crate::error::DecodeError;
use crate::types::{SensorBatch, TelemetryPacket};
use serde::{Deserialize, Serialize};

/// Layout expected on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecVariant {
    /// 71-byte checksummed fixed-point packet
    #[default]
    Checksummed,
    /// 120-byte big-endian float batch
    Float,
    /// `IMU0:...;IMU1:...` text line
    Text,
    /// Discriminate by exact length, then try text
    Auto,
}

/// Layout a payload was actually decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Binary,
    Float,
    Text,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Binary => "binary",
            DataFormat::Float => "float",
            DataFormat::Text => "text",
        }
    }
}

/// Successfully decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Full packet with producer sequence and timestamp
    Packet(TelemetryPacket),
    /// Header-less batch; sequence and timestamp are assigned by the bridge
    Batch {
        format: DataFormat,
        frames: SensorBatch,
    },
}

impl Decoded {
    pub fn format(&self) -> DataFormat {
        match self {
            Decoded::Packet(_) => DataFormat::Binary,
            Decoded::Batch { format, .. } => *format,
        }
    }

    pub fn frames(&self) -> &SensorBatch {
        match self {
            Decoded::Packet(p) => &p.frames,
            Decoded::Batch { frames, .. } => frames,
        }
    }

    /// Producer `(sequence, timestamp)` if the layout carries a header
    pub fn header(&self) -> Option<(u32, u32)> {
        match self {
            Decoded::Packet(p) => Some((p.sequence, p.timestamp)),
            Decoded::Batch { .. } => None,
        }
    }
}

impl CodecVariant {
    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, DecodeError> {
        match self {
            CodecVariant::Checksummed => packet::decode(bytes).map(Decoded::Packet),
            CodecVariant::Float => float_batch::decode(bytes).map(|frames| Decoded::Batch {
                format: DataFormat::Float,
                frames,
            }),
            CodecVariant::Text => text::parse_bytes(bytes).map(|frames| Decoded::Batch {
                format: DataFormat::Text,
                frames,
            }),
            CodecVariant::Auto => match bytes.len() {
                packet::PACKET_LEN => CodecVariant::Checksummed.decode(bytes),
                float_batch::FLOAT_BATCH_LEN => CodecVariant::Float.decode(bytes),
                _ => CodecVariant::Text.decode(bytes),
            },
        }
    }

    /// Re-encode a decoded payload in this layout
    ///
    /// Header-less sources get `sequence`/`timestamp` from the caller when
    /// the target layout needs them. `Auto` keeps the source layout.
    pub fn encode(&self, decoded: &Decoded, sequence: u32, timestamp: u32) -> Vec<u8> {
        match self {
            CodecVariant::Checksummed => {
                let packet = match decoded {
                    Decoded::Packet(p) => *p,
                    Decoded::Batch { frames, .. } => {
                        TelemetryPacket::new(sequence, timestamp, *frames)
                    }
                };
                packet::encode(&packet).to_vec()
            }
            CodecVariant::Float => float_batch::encode(decoded.frames()).to_vec(),
            CodecVariant::Text => text::format(decoded.frames()).into_bytes(),
            CodecVariant::Auto => {
                let native = match decoded.format() {
                    DataFormat::Binary => CodecVariant::Checksummed,
                    DataFormat::Float => CodecVariant::Float,
                    DataFormat::Text => CodecVariant::Text,
                };
                native.encode(decoded, sequence, timestamp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3;

    #[test]
    fn test_auto_discriminates_by_length() {
        let packet = TelemetryPacket::new(7, 9, SensorBatch::zeroed());
        let bin = packet::encode(&packet);
        let float = float_batch::encode(&SensorBatch::zeroed());

        assert_eq!(
            CodecVariant::Auto.decode(&bin).unwrap().format(),
            DataFormat::Binary
        );
        assert_eq!(
            CodecVariant::Auto.decode(&float).unwrap().format(),
            DataFormat::Float
        );
        assert_eq!(
            CodecVariant::Auto
                .decode(b"IMU0:1,2,3,4,5,6")
                .unwrap()
                .format(),
            DataFormat::Text
        );
    }

    #[test]
    fn test_auto_does_not_salvage_corrupt_packet() {
        let mut bin = packet::encode(&TelemetryPacket::new(1, 1, SensorBatch::zeroed()));
        bin[20] ^= 0x01;
        assert!(matches!(
            CodecVariant::Auto.decode(&bin),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_strict_variants_reject_other_layouts() {
        let float = float_batch::encode(&SensorBatch::zeroed());
        assert!(matches!(
            CodecVariant::Checksummed.decode(&float),
            Err(DecodeError::LengthMismatch { expected: 71, .. })
        ));
    }

    #[test]
    fn test_reencode_text_to_float() {
        let decoded = CodecVariant::Text.decode(b"IMU2:0.5,0,1,10,0,0").unwrap();
        assert_eq!(decoded.header(), None);

        let bytes = CodecVariant::Float.encode(&decoded, 0, 0);
        let back = CodecVariant::Float.decode(&bytes).unwrap();
        assert_eq!(back.frames().frames()[2].acceleration, Vector3::new(0.5, 0.0, 1.0));
    }

    #[test]
    fn test_reencode_batch_as_packet_uses_caller_header() {
        let decoded = CodecVariant::Float
            .decode(&float_batch::encode(&SensorBatch::zeroed()))
            .unwrap();
        let bytes = CodecVariant::Checksummed.encode(&decoded, 55, 66);
        let packet = packet::decode(&bytes).unwrap();
        assert_eq!((packet.sequence, packet.timestamp), (55, 66));
    }
}
