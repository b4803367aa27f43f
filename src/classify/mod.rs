//! State derivation engine
//!
//! Pure threshold classification ([`engine`]) plus the synthetic battery
//! field ([`battery`]). [`StateEngine`] bundles both behind one handle that
//! workers share.

pub mod battery;
pub mod engine;

pub use battery::BatterySimulator;
pub use engine::{Activity, Emotion, RobotState, Thresholds, classify};

use crate::config::ClassifierConfig;
use crate::types::SensorFrame;

/// Classification output plus synthetic fields for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub state: RobotState,
    pub battery_level: u8,
}

#[derive(Debug)]
pub struct StateEngine {
    thresholds: Thresholds,
    battery: BatterySimulator,
}

impl StateEngine {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            thresholds: Thresholds {
                emotion: config.emotion_thresholds,
                activity: config.activity_thresholds,
            },
            battery: BatterySimulator::new(config.battery_min, config.battery_max, config.seed),
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn derive(&self, frames: &[SensorFrame]) -> Derived {
        Derived {
            state: classify(frames, &self.thresholds),
            battery_level: self.battery.sample(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorBatch;

    #[test]
    fn test_engine_uses_configured_thresholds() {
        let config = ClassifierConfig {
            // Everything below 1000 g is calm
            emotion_thresholds: [1000.0, 2000.0, 3000.0],
            battery_min: 80,
            battery_max: 80,
            ..ClassifierConfig::default()
        };
        let engine = StateEngine::new(&config);
        let mut batch = SensorBatch::zeroed();
        batch.set(0, crate::types::Vector3::new(0.0, 0.0, 9.0), Default::default());

        let derived = engine.derive(batch.frames());
        assert_eq!(derived.state.emotion, Emotion::Calm);
        assert_eq!(derived.battery_level, 80);
    }
}
