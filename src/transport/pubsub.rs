//! Topic-addressed transport over an MQTT broker
//!
//! # Topic roles
//!
//! Topic strings are resolved to a [`TopicRole`] once, when the session is
//! built; handlers match on the role and never compare topic strings.
//!
//! | Role | Default topic | Payload |
//! |------|---------------|---------|
//! | `telemetry` | `robot/sensor/to_ultra96` | raw packet or JSON envelope |
//! | `result` | `robot/processed/data` | result JSON |
//! | `error` | `robot/errors` | error result JSON |
//!
//! # Threading
//!
//! The MQTT client's event loop runs on its own thread and only hands
//! incoming messages to a bounded channel. It never blocks on downstream
//! work: when the channel is full the message is dropped and counted.
//! Reconnection is driven by the event loop; subscriptions are renewed on
//! every CONNACK.

use crate::config::{PubSubConfig, TopicsConfig};
use crate::error::{Error, Result, TransportError};
use crate::secure::tls;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use rumqttc::{
    Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Logical purpose of a topic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicRole {
    Telemetry,
    Result,
    Error,
}

/// Topic names resolved from configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    telemetry: String,
    result: String,
    error: String,
}

impl Topics {
    pub fn from_config(config: &TopicsConfig) -> Self {
        Self {
            telemetry: config.telemetry.clone(),
            result: config.result.clone(),
            error: config.error.clone(),
        }
    }

    pub fn name(&self, role: TopicRole) -> &str {
        match role {
            TopicRole::Telemetry => &self.telemetry,
            TopicRole::Result => &self.result,
            TopicRole::Error => &self.error,
        }
    }

    pub fn role_of(&self, topic: &str) -> Option<TopicRole> {
        [TopicRole::Telemetry, TopicRole::Result, TopicRole::Error]
            .into_iter()
            .find(|&role| self.name(role) == topic)
    }
}

/// Message delivered from the broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubSubMessage {
    pub role: TopicRole,
    pub payload: Vec<u8>,
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Sleep up to `total`, returning early once `running` clears
pub(crate) fn pause(running: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total && running.load(Ordering::Relaxed) {
        let nap = step.min(total - slept);
        thread::sleep(nap);
        slept += nap;
    }
}

/// Connected broker session shared by every pub/sub link of a bridge
pub struct PubSubSession {
    client: Client,
    topics: Topics,
    qos: QoS,
    connected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

struct EventLoop {
    connection: Connection,
    client: Client,
    topics: Topics,
    qos: QoS,
    subscriptions: Vec<TopicRole>,
    tx: Sender<PubSubMessage>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    reconnect_delay: Duration,
}

impl EventLoop {
    fn run(mut self) {
        for notification in self.connection.iter() {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    log::info!("Broker session established ({:?})", ack.code);
                    self.connected.store(true, Ordering::Relaxed);
                    for role in &self.subscriptions {
                        let topic = self.topics.name(*role);
                        match self
                            .client
                            .try_subscribe(topic, self.qos)
                            .map_err(|e| TransportError::Subscribe(format!("{}: {}", topic, e)))
                        {
                            Ok(()) => log::info!("Subscribed to {} ({:?})", topic, role),
                            Err(e) => log::warn!("{}", e),
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some(role) = self.topics.role_of(&publish.topic) else {
                        log::debug!("Ignoring message on unmapped topic {}", publish.topic);
                        continue;
                    };
                    let msg = PubSubMessage {
                        role,
                        payload: publish.payload.to_vec(),
                    };
                    match self.tx.try_send(msg) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                            log::warn!("Handler queue full, dropped message on {}", publish.topic);
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            log::debug!("Handler gone, stopping event loop");
                            break;
                        }
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.store(false, Ordering::Relaxed);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = self.connected.swap(false, Ordering::Relaxed);
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    if was_connected {
                        log::warn!("Broker connection lost: {}", e);
                    } else {
                        log::warn!("Broker unavailable: {}, retrying", e);
                    }
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    pause(&self.running, self.reconnect_delay);
                }
            }
        }
        log::debug!("Broker event loop stopped");
    }
}

impl PubSubSession {
    /// Start the client and its event loop thread
    ///
    /// Messages on `subscriptions` arrive on the returned receiver.
    pub fn connect(
        config: &PubSubConfig,
        subscriptions: Vec<TopicRole>,
        running: Arc<AtomicBool>,
    ) -> Result<(Arc<Self>, Receiver<PubSubMessage>)> {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if let Some(tls_config) = &config.tls {
            let client_config = tls::client_config(tls_config)?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                client_config,
            )));
        }

        let (client, connection) = Client::new(options, config.channel_capacity);
        let (tx, rx) = bounded(config.channel_capacity);
        let topics = Topics::from_config(&config.topics);
        let qos = qos_from(config.qos);
        let connected = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let reconnects = Arc::new(AtomicU64::new(0));

        let event_loop = EventLoop {
            connection,
            client: client.clone(),
            topics: topics.clone(),
            qos,
            subscriptions,
            tx,
            running,
            connected: Arc::clone(&connected),
            dropped: Arc::clone(&dropped),
            reconnects: Arc::clone(&reconnects),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        };
        let handle = thread::Builder::new()
            .name("pubsub-events".to_string())
            .spawn(move || event_loop.run())
            .map_err(|e| Error::Other(format!("Failed to spawn broker event loop: {}", e)))?;

        log::info!(
            "Broker client {} -> {}:{}{}",
            config.client_id,
            config.broker_host,
            config.broker_port,
            if config.tls.is_some() { " (TLS)" } else { "" }
        );

        let session = Arc::new(Self {
            client,
            topics,
            qos,
            connected,
            dropped,
            reconnects,
            event_loop: Mutex::new(Some(handle)),
        });
        Ok((session, rx))
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Incoming messages dropped because the handler queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Queue a publish without blocking
    ///
    /// Fails with `NotConnected` while the session is down so callers can
    /// apply their own buffering.
    pub fn publish(&self, role: TopicRole, payload: Vec<u8>) -> std::result::Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_publish(self.topics.name(role), self.qos, false, payload)
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    /// Disconnect and wait for the event loop to finish
    pub fn shutdown(&self) {
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("Broker disconnect request failed: {}", e);
        }
        if let Some(handle) = self.event_loop.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_resolve_once() {
        let topics = Topics::from_config(&TopicsConfig::default());
        assert_eq!(topics.role_of("robot/sensor/to_ultra96"), Some(TopicRole::Telemetry));
        assert_eq!(topics.role_of("robot/processed/data"), Some(TopicRole::Result));
        assert_eq!(topics.role_of("robot/errors"), Some(TopicRole::Error));
        assert_eq!(topics.role_of("robot/other"), None);
        assert_eq!(topics.name(TopicRole::Error), "robot/errors");
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
    }

    #[test]
    fn test_pause_returns_when_stopped() {
        let running = AtomicBool::new(false);
        let start = std::time::Instant::now();
        pause(&running, Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    #[ignore = "requires an MQTT broker on 127.0.0.1:1883"]
    fn test_publish_and_receive_via_broker() {
        let running = Arc::new(AtomicBool::new(true));
        let config = PubSubConfig {
            client_id: "setu-test".to_string(),
            ..PubSubConfig::default()
        };
        let (session, rx) =
            PubSubSession::connect(&config, vec![TopicRole::Result], Arc::clone(&running)).unwrap();
        while !session.is_connected() {
            thread::sleep(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(200));
        session.publish(TopicRole::Result, b"{}".to_vec()).unwrap();
        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.role, TopicRole::Result);
        running.store(false, Ordering::Relaxed);
        session.shutdown();
    }
}
