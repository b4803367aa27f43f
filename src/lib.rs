//! Setu - sensor telemetry relay and classification bridge
//!
//! Moves five-unit IMU telemetry from robot hardware to a compute node and
//! sends derived robot state back:
//!
//! ```text
//! device ──tcp/lines──▶ relay ──tls/tcp or mqtt──▶ compute ──results──▶ relay ──▶ device
//!                                                     └──movement class──▶ actuator
//! ```
//!
//! The same binary plays every hop; [`config::BridgeMode`] and the
//! inbound/outbound link tables decide which.
//!
//! ## Modules
//!
//! - [`codec`]: packet layouts (checksummed binary, float batch, text) and the JSON envelope
//! - [`transport`]: stream framing, datagrams, MQTT session
//! - [`secure`]: mutual TLS and the symmetric payload cipher
//! - [`classify`]: emotion/activity thresholds and the synthetic battery
//! - [`bridge`]: workers, outbound links, return-path routing

pub mod bridge;
pub mod classify;
pub mod codec;
pub mod config;
pub mod error;
pub mod secure;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use bridge::RelayBridge;
pub use config::Config;
pub use error::{Error, Result};
