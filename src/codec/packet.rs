//! 71-byte checksummed sensor packet
//!
//! ```text
//! ┌──────┬──────────┬───────────┬──────────────────────────────┬─────────┐
//! │ Type │ Sequence │ Timestamp │ ax[5] ay[5] az[5]            │ CRC16   │
//! │ 0x10 │ u32 LE   │ u32 LE    │ gx[5] gy[5] gz[5]  (i16 LE)  │ u16 LE  │
//! └──────┴──────────┴───────────┴──────────────────────────────┴─────────┘
//!  0      1          5           9                              69
//! ```
//!
//! Acceleration is fixed-point ×1000 (g), angular rate ×100 (deg/s).
//! The CRC covers bytes `[0, 69)`. A mismatch rejects the whole packet.

use super::crc::crc16_ccitt_false;
use crate::error::DecodeError;
use crate::types::{PacketType, SENSOR_COUNT, SensorBatch, TelemetryPacket, Vector3};

/// Total packet size
pub const PACKET_LEN: usize = 71;

/// Offset of the trailing checksum (= length of checksummed region)
pub const CHECKSUM_OFFSET: usize = 69;

/// Offset of the first sample group
const SAMPLES_OFFSET: usize = 9;

/// Fixed-point scale for acceleration
pub const ACCEL_SCALE: f32 = 1000.0;

/// Fixed-point scale for angular rate
pub const GYRO_SCALE: f32 = 100.0;

/// Sample groups in wire order
const GROUPS: usize = 6;

#[inline]
fn quantize(value: f32, scale: f32) -> i16 {
    // `as` saturates at the i16 range and maps NaN to 0
    (value * scale).round() as i16
}

#[inline]
fn sample_offset(group: usize, sensor: usize) -> usize {
    SAMPLES_OFFSET + (group * SENSOR_COUNT + sensor) * 2
}

/// Encode a packet into its wire form, CRC included
pub fn encode(packet: &TelemetryPacket) -> [u8; PACKET_LEN] {
    let mut buf = [0u8; PACKET_LEN];
    buf[0] = packet.packet_type.as_byte();
    buf[1..5].copy_from_slice(&packet.sequence.to_le_bytes());
    buf[5..9].copy_from_slice(&packet.timestamp.to_le_bytes());

    for (sensor, frame) in packet.frames.frames().iter().enumerate() {
        let a = frame.acceleration;
        let g = frame.gyroscope;
        let values = [
            quantize(a.x, ACCEL_SCALE),
            quantize(a.y, ACCEL_SCALE),
            quantize(a.z, ACCEL_SCALE),
            quantize(g.x, GYRO_SCALE),
            quantize(g.y, GYRO_SCALE),
            quantize(g.z, GYRO_SCALE),
        ];
        for (group, value) in values.into_iter().enumerate() {
            let off = sample_offset(group, sensor);
            buf[off..off + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    finalize(&mut buf);
    buf
}

/// Write the CRC of `buf[..69]` into `buf[69..71]`
pub fn finalize(buf: &mut [u8; PACKET_LEN]) {
    let crc = crc16_ccitt_false(&buf[..CHECKSUM_OFFSET]);
    buf[CHECKSUM_OFFSET..].copy_from_slice(&crc.to_le_bytes());
}

/// Decode and verify a checksummed packet
///
/// Checks run in order: length, checksum, packet type. Nothing is parsed
/// from a packet that fails any of them.
pub fn decode(bytes: &[u8]) -> Result<TelemetryPacket, DecodeError> {
    if bytes.len() != PACKET_LEN {
        return Err(DecodeError::LengthMismatch {
            expected: PACKET_LEN,
            actual: bytes.len(),
        });
    }

    let expected = u16::from_le_bytes([bytes[CHECKSUM_OFFSET], bytes[CHECKSUM_OFFSET + 1]]);
    let actual = crc16_ccitt_false(&bytes[..CHECKSUM_OFFSET]);
    if expected != actual {
        log::debug!(
            "CRC mismatch: packet {:#06x}, computed {:#06x}",
            expected,
            actual
        );
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    let packet_type =
        PacketType::from_byte(bytes[0]).ok_or(DecodeError::UnknownPacketType(bytes[0]))?;
    let sequence = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let timestamp = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);

    let sample = |group: usize, sensor: usize| -> f32 {
        let off = sample_offset(group, sensor);
        i16::from_le_bytes([bytes[off], bytes[off + 1]]) as f32
    };

    let mut frames = SensorBatch::zeroed();
    for sensor in 0..SENSOR_COUNT {
        let values: [f32; GROUPS] = std::array::from_fn(|group| sample(group, sensor));
        frames.set(
            sensor,
            Vector3::new(
                values[0] / ACCEL_SCALE,
                values[1] / ACCEL_SCALE,
                values[2] / ACCEL_SCALE,
            ),
            Vector3::new(
                values[3] / GYRO_SCALE,
                values[4] / GYRO_SCALE,
                values[5] / GYRO_SCALE,
            ),
        );
    }

    Ok(TelemetryPacket {
        packet_type,
        sequence,
        timestamp,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_packet() -> TelemetryPacket {
        let mut frames = SensorBatch::zeroed();
        for i in 0..SENSOR_COUNT {
            let f = i as f32;
            frames.set(
                i,
                Vector3::new(0.123 * f, -0.5, 1.0 + f),
                Vector3::new(12.34, -f, 0.01 * f),
            );
        }
        TelemetryPacket::new(42, 123_456, frames)
    }

    #[test]
    fn test_zero_packet_layout() {
        let packet = TelemetryPacket::new(1, 1_000_000, SensorBatch::zeroed());
        let bytes = encode(&packet);

        assert_eq!(bytes.len(), PACKET_LEN);
        assert_eq!(bytes[0], 0x10);
        assert_eq!(&bytes[1..5], &1u32.to_le_bytes());
        assert_eq!(&bytes[5..9], &1_000_000u32.to_le_bytes());
        assert!(bytes[9..69].iter().all(|&b| b == 0));

        let crc = crc16_ccitt_false(&bytes[..69]);
        assert_eq!(&bytes[69..], &crc.to_le_bytes());
    }

    #[test]
    fn test_sample_group_order() {
        let mut frames = SensorBatch::zeroed();
        frames.set(2, Vector3::new(0.001, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.01));
        let bytes = encode(&TelemetryPacket::new(0, 0, frames));

        // ax[2] is the third value of the first group
        assert_eq!(&bytes[13..15], &1i16.to_le_bytes());
        // gz[2] is the third value of the sixth group
        let gz2 = 9 + (5 * 5 + 2) * 2;
        assert_eq!(&bytes[gz2..gz2 + 2], &1i16.to_le_bytes());
    }

    #[test]
    fn test_decode_recovers_scaled_values() {
        let packet = sample_packet();
        let decoded = decode(&encode(&packet)).unwrap();

        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.timestamp, 123_456);
        assert_eq!(decoded.packet_type, PacketType::SensorData);
        for (orig, got) in packet.frames.frames().iter().zip(decoded.frames.frames()) {
            assert_eq!(orig.sensor_id, got.sensor_id);
            assert_relative_eq!(orig.acceleration.x, got.acceleration.x, epsilon = 0.0006);
            assert_relative_eq!(orig.acceleration.z, got.acceleration.z, epsilon = 0.0006);
            assert_relative_eq!(orig.gyroscope.x, got.gyroscope.x, epsilon = 0.006);
            assert_relative_eq!(orig.gyroscope.z, got.gyroscope.z, epsilon = 0.006);
        }
    }

    #[test]
    fn test_reencode_is_byte_identical() {
        let bytes = encode(&sample_packet());
        let again = encode(&decode(&bytes).unwrap());
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_length_mismatch() {
        let bytes = encode(&sample_packet());
        for len in [0, 1, 69, 70, 72, 120] {
            let mut input = bytes.to_vec();
            input.resize(len, 0);
            assert_eq!(
                decode(&input),
                Err(DecodeError::LengthMismatch {
                    expected: 71,
                    actual: len
                })
            );
        }
    }

    #[test]
    fn test_every_single_bit_flip_rejected() {
        let bytes = encode(&sample_packet());
        for byte in 0..PACKET_LEN {
            for bit in 0..8 {
                let mut corrupt = bytes;
                corrupt[byte] ^= 1 << bit;
                assert!(
                    matches!(decode(&corrupt), Err(DecodeError::ChecksumMismatch { .. })),
                    "flip at byte {} bit {} not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_unknown_type_with_valid_crc() {
        let mut bytes = encode(&sample_packet());
        bytes[0] = 0x20;
        finalize(&mut bytes);
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownPacketType(0x20)));
    }

    #[test]
    fn test_quantize_saturates() {
        assert_eq!(quantize(100.0, ACCEL_SCALE), i16::MAX);
        assert_eq!(quantize(-100.0, ACCEL_SCALE), i16::MIN);
        assert_eq!(quantize(f32::NAN, GYRO_SCALE), 0);
    }
}
