//! Textual IMU line format
//!
//! `IMU0:ax,ay,az,gx,gy,gz;IMU1:...;IMU4:...`
//!
//! Emitted by device firmware on the encrypted serial-over-TCP hop. Parsing
//! is lenient: unparsable numbers (the firmware prints `---` for a missing
//! axis) are skipped, units with fewer than six values or an out-of-range
//! label are ignored, and units that never appear are zero-filled.

use crate::error::DecodeError;
use crate::types::{SENSOR_COUNT, SensorBatch, Vector3};
use std::fmt::Write;

const LABEL_PREFIX: &str = "IMU";

fn parse_label(label: &str) -> Option<usize> {
    let label = label.trim();
    let id = label.strip_prefix(LABEL_PREFIX).unwrap_or(label);
    id.trim().parse::<usize>().ok().filter(|&id| id < SENSOR_COUNT)
}

/// Parse one IMU line into a batch
pub fn parse(text: &str) -> Result<SensorBatch, DecodeError> {
    let mut batch = SensorBatch::zeroed();
    let mut found = 0usize;

    for unit in text.trim().split(';') {
        let Some((label, values)) = unit.split_once(':') else {
            continue;
        };
        let Some(sensor_id) = parse_label(label) else {
            log::trace!("Skipping IMU entry with label {:?}", label);
            continue;
        };

        let nums: Vec<f32> = values
            .split(',')
            .filter_map(|v| v.trim().parse::<f32>().ok())
            .collect();
        if nums.len() < 6 {
            log::trace!("IMU{} has {} values, skipping", sensor_id, nums.len());
            continue;
        }

        batch.set(
            sensor_id,
            Vector3::new(nums[0], nums[1], nums[2]),
            Vector3::new(nums[3], nums[4], nums[5]),
        );
        found += 1;
    }

    if found == 0 {
        return Err(DecodeError::InvalidText(
            "no valid IMU data found in text".to_string(),
        ));
    }
    Ok(batch)
}

/// Parse raw bytes, rejecting non-UTF-8 input
pub fn parse_bytes(bytes: &[u8]) -> Result<SensorBatch, DecodeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DecodeError::InvalidText(format!("not UTF-8: {}", e)))?;
    parse(text)
}

/// Format a batch as an IMU line (3 decimal places)
pub fn format(batch: &SensorBatch) -> String {
    let mut out = String::with_capacity(SENSOR_COUNT * 48);
    for (i, f) in batch.frames().iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let a = f.acceleration;
        let g = f.gyroscope;
        // Writing to a String cannot fail
        let _ = write!(
            out,
            "{}{}:{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
            LABEL_PREFIX, f.sensor_id, a.x, a.y, a.z, g.x, g.y, g.z
        );
    }
    out
}
