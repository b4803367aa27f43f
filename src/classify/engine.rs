//! State derivation: sensor batch → {emotion, activity}
//!
//! ## Emotion
//!
//! Mean acceleration magnitude over the batch, banded by three cutoffs:
//!
//! ```text
//!        calm     │  curious  │  excited  │  agitated
//! ────────────────┼───────────┼───────────┼──────────────▶ mean ‖a‖ (g)
//!                t0          t1          t2
//! ```
//!
//! ## Activity
//!
//! Pooled gyroscope variance: per-axis means over the batch, then the mean
//! squared deviation over every frame and axis. Banded by four cutoffs into
//! sleeping, resting, exploring, playing, agitated.
//!
//! Each band is `[cutoff_i, cutoff_i+1)`. An empty slice yields `unknown`;
//! non-finite input or arithmetic yields `error`. Neither function panics.

use crate::types::SensorFrame;
use serde::{Deserialize, Serialize};

/// Ordered emotion bands plus the two degenerate outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Calm,
    Curious,
    Excited,
    Agitated,
    Error,
    Unknown,
}

impl Emotion {
    const BANDS: [Emotion; 4] = [
        Emotion::Calm,
        Emotion::Curious,
        Emotion::Excited,
        Emotion::Agitated,
    ];

    /// Position in the calm < curious < excited < agitated order
    pub fn level(&self) -> Option<u8> {
        Self::BANDS.iter().position(|e| e == self).map(|i| i as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Calm => "calm",
            Emotion::Curious => "curious",
            Emotion::Excited => "excited",
            Emotion::Agitated => "agitated",
            Emotion::Error => "error",
            Emotion::Unknown => "unknown",
        }
    }
}

/// Ordered activity bands plus the two degenerate outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Sleeping,
    Resting,
    Exploring,
    Playing,
    Agitated,
    Error,
    Unknown,
}

impl Activity {
    const BANDS: [Activity; 5] = [
        Activity::Sleeping,
        Activity::Resting,
        Activity::Exploring,
        Activity::Playing,
        Activity::Agitated,
    ];

    /// Position in the sleeping < … < agitated order
    ///
    /// This is also the movement class sent to actuators.
    pub fn level(&self) -> Option<u8> {
        Self::BANDS.iter().position(|a| a == self).map(|i| i as u8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Sleeping => "sleeping",
            Activity::Resting => "resting",
            Activity::Exploring => "exploring",
            Activity::Playing => "playing",
            Activity::Agitated => "agitated",
            Activity::Error => "error",
            Activity::Unknown => "unknown",
        }
    }
}

/// Band cutoffs, strictly increasing (checked by config validation)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub emotion: [f32; 3],
    pub activity: [f32; 4],
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            emotion: [0.5, 1.5, 3.0],
            activity: [0.1, 1.0, 5.0, 10.0],
        }
    }
}

/// Number of cutoffs at or below `value`
fn band(value: f32, cutoffs: &[f32]) -> usize {
    cutoffs.iter().take_while(|&&c| value >= c).count()
}

/// Mean ‖acceleration‖ over the frames
///
/// `None` for an empty slice; may be non-finite if the input is.
pub fn mean_accel_magnitude(frames: &[SensorFrame]) -> Option<f32> {
    if frames.is_empty() {
        return None;
    }
    let total: f32 = frames.iter().map(|f| f.acceleration.magnitude()).sum();
    Some(total / frames.len() as f32)
}

/// Pooled variance of gyroscope deviations from the per-axis mean
pub fn pooled_gyro_variance(frames: &[SensorFrame]) -> Option<f32> {
    if frames.is_empty() {
        return None;
    }
    let n = frames.len() as f32;
    let mut mean = [0.0f32; 3];
    for f in frames {
        for (m, v) in mean.iter_mut().zip(f.gyroscope.as_array()) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let sum_sq: f32 = frames
        .iter()
        .flat_map(|f| {
            f.gyroscope
                .as_array()
                .into_iter()
                .zip(mean)
                .map(|(v, m)| (v - m).powi(2))
        })
        .sum();
    Some(sum_sq / (n * 3.0))
}

pub fn classify_emotion(frames: &[SensorFrame], thresholds: &Thresholds) -> Emotion {
    match mean_accel_magnitude(frames) {
        None => Emotion::Unknown,
        Some(m) if !m.is_finite() => Emotion::Error,
        Some(m) => Emotion::BANDS[band(m, &thresholds.emotion)],
    }
}

pub fn classify_activity(frames: &[SensorFrame], thresholds: &Thresholds) -> Activity {
    match pooled_gyro_variance(frames) {
        None => Activity::Unknown,
        Some(v) if !v.is_finite() => Activity::Error,
        Some(v) => Activity::BANDS[band(v, &thresholds.activity)],
    }
}

/// Derived robot state for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotState {
    pub emotion: Emotion,
    pub activity: Activity,
}

pub fn classify(frames: &[SensorFrame], thresholds: &Thresholds) -> RobotState {
    RobotState {
        emotion: classify_emotion(frames, thresholds),
        activity: classify_activity(frames, thresholds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SensorBatch, Vector3};
    use approx::assert_relative_eq;

    fn batch_with(accel: [f32; 3], gyros: [[f32; 3]; 5]) -> SensorBatch {
        SensorBatch::from_readings(std::array::from_fn(|i| {
            (Vector3::from(accel), Vector3::from(gyros[i]))
        }))
    }

    #[test]
    fn test_all_zero_is_calm_and_sleeping() {
        let batch = SensorBatch::zeroed();
        let state = classify(batch.frames(), &Thresholds::default());
        assert_eq!(state.emotion, Emotion::Calm);
        assert_eq!(state.activity, Activity::Sleeping);
    }

    #[test]
    fn test_empty_is_unknown() {
        let state = classify(&[], &Thresholds::default());
        assert_eq!(state.emotion, Emotion::Unknown);
        assert_eq!(state.activity, Activity::Unknown);
    }

    #[test]
    fn test_non_finite_is_error() {
        let mut batch = SensorBatch::zeroed();
        batch.set(0, Vector3::new(f32::NAN, 0.0, 0.0), Vector3::new(f32::INFINITY, 0.0, 0.0));
        let state = classify(batch.frames(), &Thresholds::default());
        assert_eq!(state.emotion, Emotion::Error);
        assert_eq!(state.activity, Activity::Error);
    }

    #[test]
    fn test_emotion_bands() {
        let t = Thresholds::default();
        let zero = [[0.0; 3]; 5];
        let cases = [
            ([0.0, 0.0, 0.49], Emotion::Calm),
            ([0.0, 0.0, 0.5], Emotion::Curious),
            ([0.0, 0.0, 1.0], Emotion::Curious),
            ([0.0, 1.5, 0.0], Emotion::Excited),
            ([3.0, 4.0, 0.0], Emotion::Agitated),
        ];
        for (accel, expected) in cases {
            let batch = batch_with(accel, zero);
            assert_eq!(classify_emotion(batch.frames(), &t), expected, "{:?}", accel);
        }
    }

    #[test]
    fn test_pooled_variance() {
        // x deviates ±2 on two frames, everything else at the mean
        let gyros = [
            [2.0, 0.0, 0.0],
            [-2.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
        ];
        let batch = batch_with([0.0; 3], gyros);
        // (4 + 4) / (5 * 3)
        assert_relative_eq!(pooled_gyro_variance(batch.frames()).unwrap(), 8.0 / 15.0);
        assert_eq!(
            classify_activity(batch.frames(), &Thresholds::default()),
            Activity::Resting
        );
    }

    #[test]
    fn test_constant_rotation_has_no_variance() {
        let batch = batch_with([0.0; 3], [[90.0, -45.0, 10.0]; 5]);
        assert_eq!(
            classify_activity(batch.frames(), &Thresholds::default()),
            Activity::Sleeping
        );
    }

    #[test]
    fn test_activity_bands_with_custom_thresholds() {
        let t = Thresholds {
            emotion: [0.5, 1.5, 3.0],
            activity: [1.0, 2.0, 3.0, 4.0],
        };
        // One axis alternating ±a gives variance a²·4/15 with 4 non-zero frames
        let gyro = |a: f32| [[a, 0.0, 0.0], [-a, 0.0, 0.0], [a, 0.0, 0.0], [-a, 0.0, 0.0], [0.0; 3]];
        let variance = |a: f32| a * a * 4.0 / 15.0;

        let cases = [
            (1.0, Activity::Sleeping),
            (2.5, Activity::Resting),
            (3.0, Activity::Exploring),
            (3.5, Activity::Playing),
            (10.0, Activity::Agitated),
        ];
        for (a, expected) in cases {
            let batch = batch_with([0.0; 3], gyro(a));
            let v = pooled_gyro_variance(batch.frames()).unwrap();
            assert_relative_eq!(v, variance(a), max_relative = 1e-5);
            assert_eq!(classify_activity(batch.frames(), &t), expected, "a = {}", a);
        }
    }

    #[test]
    fn test_levels_and_names() {
        assert_eq!(Activity::Sleeping.level(), Some(0));
        assert_eq!(Activity::Agitated.level(), Some(4));
        assert_eq!(Activity::Unknown.level(), None);
        assert_eq!(Emotion::Excited.level(), Some(2));
        assert_eq!(Emotion::Error.level(), None);
        assert_eq!(Emotion::Agitated.as_str(), "agitated");
        assert_eq!(
            serde_json::to_string(&Activity::Exploring).unwrap(),
            "\"exploring\""
        );
    }
}
