//! Sensor data types shared by the codec, classifier and bridge

use serde::{Deserialize, Serialize};

/// Number of inertial units in every batch
pub const SENSOR_COUNT: usize = 5;

/// Three-axis reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm
    pub fn magnitude(&self) -> f32 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn as_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f32; 3]> for Vector3 {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// One inertial unit's reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Position within the batch (0..5)
    pub sensor_id: u8,
    /// Acceleration (g)
    pub acceleration: Vector3,
    /// Angular rate (deg/s)
    pub gyroscope: Vector3,
}

impl SensorFrame {
    pub fn new(sensor_id: u8, acceleration: Vector3, gyroscope: Vector3) -> Self {
        Self {
            sensor_id,
            acceleration,
            gyroscope,
        }
    }

    /// Zero reading for a unit that reported nothing
    pub fn zero(sensor_id: u8) -> Self {
        Self::new(sensor_id, Vector3::ZERO, Vector3::ZERO)
    }

    pub fn is_finite(&self) -> bool {
        self.acceleration.is_finite() && self.gyroscope.is_finite()
    }
}

/// Exactly [`SENSOR_COUNT`] frames ordered by `sensor_id`
///
/// Missing units are zero-filled so consumers can always index positionally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorBatch {
    frames: [SensorFrame; SENSOR_COUNT],
}

impl SensorBatch {
    /// All-zero batch with ids 0..5
    pub fn zeroed() -> Self {
        Self {
            frames: std::array::from_fn(|i| SensorFrame::zero(i as u8)),
        }
    }

    /// Build from per-unit readings; ids are assigned positionally
    pub fn from_readings(readings: [(Vector3, Vector3); SENSOR_COUNT]) -> Self {
        let mut batch = Self::zeroed();
        for (frame, (accel, gyro)) in batch.frames.iter_mut().zip(readings) {
            frame.acceleration = accel;
            frame.gyroscope = gyro;
        }
        batch
    }

    /// Overwrite one unit's reading; ids outside the batch are ignored
    pub fn set(&mut self, sensor_id: usize, acceleration: Vector3, gyroscope: Vector3) -> bool {
        match self.frames.get_mut(sensor_id) {
            Some(frame) => {
                frame.acceleration = acceleration;
                frame.gyroscope = gyroscope;
                true
            }
            None => false,
        }
    }

    pub fn frames(&self) -> &[SensorFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Default for SensorBatch {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Packet type tag (byte 0 of the checksummed layout)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    SensorData = 0x10,
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(PacketType::SensorData),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Unit of transport produced by the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryPacket {
    pub packet_type: PacketType,
    /// Producer sequence number (wraps at u32)
    pub sequence: u32,
    /// Producer capture time
    pub timestamp: u32,
    pub frames: SensorBatch,
}

impl TelemetryPacket {
    pub fn new(sequence: u32, timestamp: u32, frames: SensorBatch) -> Self {
        Self {
            packet_type: PacketType::SensorData,
            sequence,
            timestamp,
            frames,
        }
    }
}
