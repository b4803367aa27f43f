//! Configuration for Setu
//!
//! Loaded from a TOML file. Every field has a default, so an empty file is
//! a plaintext classify-mode bridge listening on `0.0.0.0:5000`.
//!
//! ```toml
//! [bridge]
//! mode = "forward"
//!
//! [inbound]
//! kind = "tcp"
//! bind_address = "0.0.0.0:5000"
//! codec = "auto"
//!
//! [[outbound]]
//! name = "compute"
//! kind = "tcp"
//! address = "10.0.0.2:6000"
//! expect_reply = true
//! ```

use crate::codec::CodecVariant;
use crate::error::{Error, Result};
use crate::transport::pubsub::TopicRole;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub inbound: InboundConfig,
    #[serde(default)]
    pub outbound: Vec<OutboundConfig>,
    /// Broker settings, required when any link is `pubsub`
    #[serde(default)]
    pub pubsub: Option<PubSubConfig>,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the bridge does with each decoded message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMode {
    /// Compute node: derive robot state and emit results
    #[default]
    Classify,
    /// Relay hop: verify and forward telemetry
    Forward,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub mode: BridgeMode,

    /// Name stamped into envelopes and results as `source`
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Interval between stats log lines (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Read timeout used by inbound workers to poll the shutdown flag
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            name: default_bridge_name(),
            stats_interval_secs: default_stats_interval(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Inbound transport kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    #[default]
    Tcp,
    Udp,
    Pubsub,
}

/// Message delimiting on stream ingress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFraming {
    /// 4-byte big-endian length prefix
    #[default]
    LengthPrefixed,
    /// `base64(ciphertext)\n` per message; requires `cipher`
    EncryptedLines,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InboundConfig {
    #[serde(default)]
    pub kind: InboundKind,

    /// Listen address for `tcp` and `udp`
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub framing: StreamFraming,

    #[serde(default)]
    pub codec: CodecVariant,

    /// Topic role subscribed to when `kind = "pubsub"`
    #[serde(default = "default_inbound_topic")]
    pub topic: TopicRole,

    /// Mutual TLS on accepted stream connections
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Symmetric payload cipher (device-facing hop only)
    #[serde(default)]
    pub cipher: Option<CipherConfig>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            kind: InboundKind::default(),
            bind_address: default_bind_address(),
            framing: StreamFraming::default(),
            codec: CodecVariant::default(),
            topic: default_inbound_topic(),
            tls: None,
            cipher: None,
        }
    }
}

/// Outbound link kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// Length-prefixed stream client
    Tcp,
    /// One datagram per message
    Udp,
    /// Publish on the broker session
    Pubsub,
    /// 16-byte encrypted movement-class block per result
    Actuator,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OutboundConfig {
    /// Label used in logs and stats
    #[serde(default = "default_link_name")]
    pub name: String,

    pub kind: OutboundKind,

    /// `host:port` of the remote end (unused for `pubsub`)
    #[serde(default)]
    pub address: String,

    /// Re-encode forwarded telemetry into this layout
    #[serde(default)]
    pub codec: Option<CodecVariant>,

    /// Wrap forwarded telemetry in a JSON envelope (`pubsub` only)
    #[serde(default)]
    pub envelope: bool,

    /// Wait for one reply frame per message and route it back to the sender
    #[serde(default)]
    pub expect_reply: bool,

    /// Wait for a short textual acknowledgement (`actuator` only)
    #[serde(default = "default_true")]
    pub expect_ack: bool,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Required for `actuator`
    #[serde(default)]
    pub cipher: Option<CipherConfig>,

    /// Messages queued while the link is down
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,

    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
}

impl OutboundConfig {
    /// Link with defaults for everything but kind and address
    pub fn new(name: &str, kind: OutboundKind, address: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            address: address.to_string(),
            codec: None,
            envelope: false,
            expect_reply: false,
            expect_ack: default_true(),
            tls: None,
            cipher: None,
            buffer_capacity: default_buffer_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_io_timeout(),
            ack_timeout_ms: default_ack_timeout(),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.max(1))
    }
}

/// Mutual TLS material
///
/// Certificate provisioning is external; these are paths to PEM files.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TlsConfig {
    /// CA bundle used to verify the peer
    pub ca_cert: PathBuf,
    /// Local certificate chain
    pub cert: PathBuf,
    /// Local private key
    pub key: PathBuf,
    /// Skip peer-name verification (handshake and encryption still happen)
    #[serde(default)]
    pub insecure: bool,
    /// Name expected in the server certificate (defaults to the host part)
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Symmetric cipher algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherKind {
    /// AES-128 in CBC mode with fixed key and IV
    Aes128Cbc,
    /// 16-byte repeating XOR keystream
    Xor,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CipherConfig {
    pub kind: CipherKind,
    /// 16-byte key as 32 hex digits
    pub key: String,
    /// 16-byte IV as 32 hex digits (AES only, default all zero)
    #[serde(default = "default_iv")]
    pub iv: String,
}

/// Broker connection shared by all `pubsub` links
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PubSubConfig {
    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// 0, 1 or 2
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Incoming messages queued between the event loop and the handler
    #[serde(default = "default_buffer_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    #[serde(default)]
    pub topics: TopicsConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            qos: default_qos(),
            channel_capacity: default_buffer_capacity(),
            reconnect_delay_ms: default_reconnect_delay(),
            tls: None,
            topics: TopicsConfig::default(),
        }
    }
}

/// Logical topic names
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicsConfig {
    #[serde(default = "default_telemetry_topic")]
    pub telemetry: String,
    #[serde(default = "default_result_topic")]
    pub result: String,
    #[serde(default = "default_error_topic")]
    pub error: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_topic(),
            result: default_result_topic(),
            error: default_error_topic(),
        }
    }
}

/// State derivation thresholds and synthetic fields
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Mean acceleration magnitude cutoffs (g): calm | curious | excited | agitated
    #[serde(default = "default_emotion_thresholds")]
    pub emotion_thresholds: [f32; 3],

    /// Pooled gyro variance cutoffs ((deg/s)²): sleeping | resting | exploring | playing | agitated
    #[serde(default = "default_activity_thresholds")]
    pub activity_thresholds: [f32; 4],

    #[serde(default = "default_battery_min")]
    pub battery_min: u8,

    #[serde(default = "default_battery_max")]
    pub battery_max: u8,

    /// Battery RNG seed (0 = entropy)
    #[serde(default)]
    pub seed: u64,

    /// First session id handed out
    #[serde(default = "default_session_start")]
    pub session_start: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            emotion_thresholds: default_emotion_thresholds(),
            activity_thresholds: default_activity_thresholds(),
            battery_min: default_battery_min(),
            battery_max: default_battery_max(),
            seed: 0,
            session_start: default_session_start(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_bridge_name() -> String {
    "setu".to_string()
}
fn default_stats_interval() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    100
}
fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_inbound_topic() -> TopicRole {
    TopicRole::Telemetry
}
fn default_link_name() -> String {
    "outbound".to_string()
}
fn default_true() -> bool {
    true
}
fn default_buffer_capacity() -> usize {
    256
}
fn default_reconnect_delay() -> u64 {
    3000
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_io_timeout() -> u64 {
    10_000
}
fn default_ack_timeout() -> u64 {
    1000
}
fn default_iv() -> String {
    "00000000000000000000000000000000".to_string()
}
fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "setu".to_string()
}
fn default_keep_alive() -> u64 {
    60
}
fn default_qos() -> u8 {
    1
}
fn default_telemetry_topic() -> String {
    "robot/sensor/to_ultra96".to_string()
}
fn default_result_topic() -> String {
    "robot/processed/data".to_string()
}
fn default_error_topic() -> String {
    "robot/errors".to_string()
}
fn default_emotion_thresholds() -> [f32; 3] {
    [0.5, 1.5, 3.0]
}
fn default_activity_thresholds() -> [f32; 4] {
    [0.1, 1.0, 5.0, 10.0]
}
fn default_battery_min() -> u8 {
    70
}
fn default_battery_max() -> u8 {
    100
}
fn default_session_start() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

fn strictly_increasing(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite()) && values.windows(2).all(|w| w[0] < w[1])
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if !strictly_increasing(&c.emotion_thresholds) {
            return Err(Error::Config(
                "classifier.emotion_thresholds must be finite and strictly increasing".into(),
            ));
        }
        if !strictly_increasing(&c.activity_thresholds) {
            return Err(Error::Config(
                "classifier.activity_thresholds must be finite and strictly increasing".into(),
            ));
        }
        if c.battery_min > c.battery_max || c.battery_max > 100 {
            return Err(Error::Config(format!(
                "classifier battery range {}..={} must lie within 0..=100",
                c.battery_min, c.battery_max
            )));
        }

        if self.inbound.framing == StreamFraming::EncryptedLines {
            if self.inbound.kind != InboundKind::Tcp {
                return Err(Error::Config(
                    "inbound.framing = \"encrypted_lines\" requires kind = \"tcp\"".into(),
                ));
            }
            if self.inbound.cipher.is_none() {
                return Err(Error::Config(
                    "inbound.framing = \"encrypted_lines\" requires [inbound.cipher]".into(),
                ));
            }
        }
        if self.inbound.tls.is_some() && self.inbound.kind != InboundKind::Tcp {
            return Err(Error::Config(
                "[inbound.tls] requires kind = \"tcp\" (broker TLS goes in [pubsub.tls])".into(),
            ));
        }
        if self.inbound.tls.is_some() && self.inbound.cipher.is_some() {
            return Err(Error::Config(
                "inbound link cannot use both TLS and a payload cipher".into(),
            ));
        }
        if let Some(cipher) = &self.inbound.cipher {
            cipher.validate("inbound.cipher")?;
        }

        let needs_broker = self.inbound.kind == InboundKind::Pubsub
            || self.outbound.iter().any(|o| o.kind == OutboundKind::Pubsub);
        if needs_broker && self.pubsub.is_none() {
            return Err(Error::Config(
                "a pubsub link is configured but [pubsub] is missing".into(),
            ));
        }
        if let Some(ps) = &self.pubsub {
            let t = &ps.topics;
            if t.telemetry.is_empty() || t.result.is_empty() || t.error.is_empty() {
                return Err(Error::Config("pubsub topics must not be empty".into()));
            }
            if ps.qos > 2 {
                return Err(Error::Config(format!("pubsub.qos {} is not 0, 1 or 2", ps.qos)));
            }
            if ps.channel_capacity == 0 {
                return Err(Error::Config("pubsub.channel_capacity must be > 0".into()));
            }
        }

        for link in &self.outbound {
            let ctx = format!("outbound \"{}\"", link.name);
            if link.buffer_capacity == 0 {
                return Err(Error::Config(format!("{}: buffer_capacity must be > 0", ctx)));
            }
            if link.kind != OutboundKind::Pubsub && link.address.is_empty() {
                return Err(Error::Config(format!("{}: address is required", ctx)));
            }
            if link.tls.is_some() && link.cipher.is_some() {
                return Err(Error::Config(format!(
                    "{}: cannot use both TLS and a payload cipher",
                    ctx
                )));
            }
            match link.kind {
                OutboundKind::Actuator => match &link.cipher {
                    Some(cipher) => cipher.validate(&ctx)?,
                    None => {
                        return Err(Error::Config(format!("{}: actuator requires a cipher", ctx)));
                    }
                },
                _ if link.cipher.is_some() => {
                    return Err(Error::Config(format!(
                        "{}: payload cipher is only supported on actuator links",
                        ctx
                    )));
                }
                _ => {}
            }
            if link.expect_reply && link.kind != OutboundKind::Tcp {
                return Err(Error::Config(format!(
                    "{}: expect_reply is only supported on tcp links",
                    ctx
                )));
            }
        }
        Ok(())
    }
}

impl CipherConfig {
    fn validate(&self, ctx: &str) -> Result<()> {
        let key = hex::decode(&self.key)
            .map_err(|e| Error::Config(format!("{}: key is not hex: {}", ctx, e)))?;
        if key.len() != 16 {
            return Err(Error::Config(format!(
                "{}: key must be 16 bytes, got {}",
                ctx,
                key.len()
            )));
        }
        if self.kind == CipherKind::Aes128Cbc {
            let iv = hex::decode(&self.iv)
                .map_err(|e| Error::Config(format!("{}: iv is not hex: {}", ctx, e)))?;
            if iv.len() != 16 {
                return Err(Error::Config(format!(
                    "{}: iv must be 16 bytes, got {}",
                    ctx,
                    iv.len()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_valid_classifier() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.bridge.mode, BridgeMode::Classify);
        assert_eq!(config.inbound.kind, InboundKind::Tcp);
        assert_eq!(config.inbound.bind_address, "0.0.0.0:5000");
        assert_eq!(config.inbound.codec, CodecVariant::Checksummed);
        assert!(config.outbound.is_empty());
        assert_eq!(config.classifier.emotion_thresholds, [0.5, 1.5, 3.0]);
        assert_eq!(config.classifier.session_start, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[bridge]
mode = "forward"
name = "laptop-relay"

[inbound]
kind = "tcp"
bind_address = "127.0.0.1:5001"
codec = "auto"

[[outbound]]
name = "compute"
kind = "tcp"
address = "10.0.0.2:6000"
expect_reply = true
reconnect_delay_ms = 500

[[outbound]]
name = "broker"
kind = "pubsub"
envelope = true

[[outbound]]
name = "arm"
kind = "actuator"
address = "10.0.0.9:7000"
cipher = { kind = "xor", key = "55aa33cc0ff09966123456789abcdef01" }

[pubsub]
broker_host = "broker.local"
broker_port = 8883

[pubsub.topics]
telemetry = "t/in"

[classifier]
emotion_thresholds = [1.0, 2.0, 4.0]

[logging]
level = "debug"
"#;
        // Key above is 33 hex digits: rejected
        assert!(Config::from_toml_str(toml_content).is_err());

        let fixed = toml_content.replace("123456789abcdef01", "12345678abcdef01");
        let config = Config::from_toml_str(&fixed).unwrap();
        assert_eq!(config.bridge.mode, BridgeMode::Forward);
        assert_eq!(config.bridge.name, "laptop-relay");
        assert_eq!(config.inbound.codec, CodecVariant::Auto);
        assert_eq!(config.outbound.len(), 3);
        assert!(config.outbound[0].expect_reply);
        assert_eq!(config.outbound[0].reconnect_delay(), Duration::from_millis(500));
        assert_eq!(config.outbound[0].buffer_capacity, 256);
        assert!(config.outbound[1].envelope);
        assert_eq!(config.outbound[2].kind, OutboundKind::Actuator);
        let ps = config.pubsub.unwrap();
        assert_eq!(ps.broker_port, 8883);
        assert_eq!(ps.topics.telemetry, "t/in");
        assert_eq!(ps.topics.result, "robot/processed/data");
        assert_eq!(config.classifier.emotion_thresholds, [1.0, 2.0, 4.0]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let err = Config::from_toml_str(
            "[classifier]\nactivity_thresholds = [0.1, 5.0, 1.0, 10.0]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("activity_thresholds"));
    }

    #[test]
    fn test_battery_range_rejected() {
        assert!(Config::from_toml_str("[classifier]\nbattery_min = 90\nbattery_max = 80\n").is_err());
        assert!(Config::from_toml_str("[classifier]\nbattery_max = 101\n").is_err());
    }

    #[test]
    fn test_pubsub_link_requires_broker() {
        let err = Config::from_toml_str("[[outbound]]\nkind = \"pubsub\"\n").unwrap_err();
        assert!(err.to_string().contains("[pubsub]"));
    }

    #[test]
    fn test_encrypted_lines_requires_cipher() {
        assert!(Config::from_toml_str("[inbound]\nframing = \"encrypted_lines\"\n").is_err());
        let ok = r#"
[inbound]
framing = "encrypted_lines"
codec = "text"
cipher = { kind = "aes128_cbc", key = "2b7e151628aed2a6abf7158809cf4f3c", iv = "000102030405060708090a0b0c0d0e0f" }
"#;
        assert!(Config::from_toml_str(ok).is_ok());
    }

    #[test]
    fn test_inbound_tls_only_on_tcp() {
        let tls = "tls = { ca_cert = \"ca.pem\", cert = \"cert.pem\", key = \"key.pem\" }\n";
        for kind in ["udp", "pubsub"] {
            let toml = format!(
                "[inbound]\nkind = \"{}\"\n{}\n[pubsub]\nbroker_host = \"127.0.0.1\"\n",
                kind, tls
            );
            let err = Config::from_toml_str(&toml).unwrap_err();
            assert!(err.to_string().contains("[inbound.tls]"), "{}: {}", kind, err);
        }
        let tcp = format!("[inbound]\nkind = \"tcp\"\n{}", tls);
        assert!(Config::from_toml_str(&tcp).is_ok());
    }

    #[test]
    fn test_actuator_requires_cipher() {
        let toml = "[[outbound]]\nkind = \"actuator\"\naddress = \"127.0.0.1:1\"\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setu.toml");
        fs::write(&path, "[bridge]\nmode = \"forward\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.bridge.mode, BridgeMode::Forward);

        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));
    }
}
