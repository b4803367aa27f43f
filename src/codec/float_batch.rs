//! 120-byte float batch
//!
//! Five sensors × `[ax ay az gx gy gz]` as big-endian `f32`, sensor-major.
//! No header and no checksum: only used on links that already guarantee
//! integrity, so the only validation is the total length.

use crate::error::DecodeError;
use crate::types::{SENSOR_COUNT, SensorBatch, Vector3};

/// Values per sensor
const VALUES_PER_SENSOR: usize = 6;

/// Total batch size
pub const FLOAT_BATCH_LEN: usize = SENSOR_COUNT * VALUES_PER_SENSOR * 4;

pub fn encode(batch: &SensorBatch) -> [u8; FLOAT_BATCH_LEN] {
    let mut buf = [0u8; FLOAT_BATCH_LEN];
    let values = batch.frames().iter().flat_map(|f| {
        let [ax, ay, az] = f.acceleration.as_array();
        let [gx, gy, gz] = f.gyroscope.as_array();
        [ax, ay, az, gx, gy, gz]
    });
    for (chunk, value) in buf.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_be_bytes());
    }
    buf
}

pub fn decode(bytes: &[u8]) -> Result<SensorBatch, DecodeError> {
    if bytes.len() != FLOAT_BATCH_LEN {
        return Err(DecodeError::LengthMismatch {
            expected: FLOAT_BATCH_LEN,
            actual: bytes.len(),
        });
    }

    let mut batch = SensorBatch::zeroed();
    for (sensor, chunk) in bytes.chunks_exact(VALUES_PER_SENSOR * 4).enumerate() {
        let v: [f32; VALUES_PER_SENSOR] = std::array::from_fn(|i| {
            let o = i * 4;
            f32::from_be_bytes([chunk[o], chunk[o + 1], chunk[o + 2], chunk[o + 3]])
        });
        batch.set(
            sensor,
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
        );
    }
    Ok(batch)
}
