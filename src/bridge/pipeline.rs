//! Per-payload processing shared by every inbound worker
//!
//! ```text
//! payload ─▶ unwrap envelope ─▶ decode ─┬─ classify ─▶ result JSON ─▶ reply + links
//!                                      ├─ forward  ─▶ telemetry   ─▶ links
//!                                      └─ error    ─▶ error JSON  ─▶ reply + error topic
//! ```
//!
//! A bad payload never ends a connection: it produces an error result and
//! the worker moves on to the next message.
//!
//! # Who publishes on the broker
//!
//! | Message | Published by |
//! |---------|--------------|
//! | result | `pubsub` links if any exist, else the pipeline itself (pub/sub ingress only) |
//! | decode error | the pipeline, unless this bridge consumes the error topic |
//!
//! A bridge never publishes on a topic it subscribes to, so nothing it
//! sends comes back to it.

use super::outbound::{OutboundHandle, OutboundMessage, Origin};
use super::peers::PeerRegistry;
use super::result::{ClassificationResult, ResultRoute};
use super::stats::BridgeStats;
use crate::classify::StateEngine;
use crate::codec::envelope::now_ms;
use crate::codec::{CodecVariant, Decoded, Envelope};
use crate::config::{BridgeMode, Config, InboundKind, OutboundKind};
use crate::error::DecodeError;
use crate::transport::{PubSubSession, TopicRole};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Topic roles the broker session of `config` subscribes to
pub fn broker_subscriptions(config: &Config) -> Vec<TopicRole> {
    let mut roles = Vec::new();
    if config.inbound.kind == InboundKind::Pubsub {
        roles.push(config.inbound.topic);
    }
    let has_pubsub_link = config
        .outbound
        .iter()
        .any(|o| o.kind == OutboundKind::Pubsub);
    if has_pubsub_link && config.bridge.mode == BridgeMode::Forward {
        // Return path for results computed elsewhere
        for role in [TopicRole::Result, TopicRole::Error] {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }
    roles
}

pub struct Pipeline {
    mode: BridgeMode,
    codec: CodecVariant,
    source: String,
    engine: StateEngine,
    next_session: AtomicU64,
    /// Sequence numbers for header-less layouts
    next_sequence: AtomicU32,
    /// Publish results directly on the broker (pub/sub ingress without a pubsub link)
    publish_results: bool,
    /// Publish decode errors on the error topic
    publish_errors: bool,
    stats: Arc<BridgeStats>,
    peers: Arc<PeerRegistry>,
    outbound: Vec<OutboundHandle>,
    session: Option<Arc<PubSubSession>>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        stats: Arc<BridgeStats>,
        peers: Arc<PeerRegistry>,
        outbound: Vec<OutboundHandle>,
        session: Option<Arc<PubSubSession>>,
    ) -> Self {
        let has_pubsub_link = outbound.iter().any(|l| l.kind() == OutboundKind::Pubsub);
        let subscribed = broker_subscriptions(config);
        Self {
            mode: config.bridge.mode,
            codec: config.inbound.codec,
            source: config.bridge.name.clone(),
            engine: StateEngine::new(&config.classifier),
            next_session: AtomicU64::new(config.classifier.session_start),
            next_sequence: AtomicU32::new(0),
            publish_results: config.inbound.kind == InboundKind::Pubsub
                && !has_pubsub_link
                && !subscribed.contains(&TopicRole::Result),
            publish_errors: !subscribed.contains(&TopicRole::Error),
            stats,
            peers,
            outbound,
            session,
        }
    }

    /// Process one inbound payload
    ///
    /// Returns the bytes to send back to the sender, if any. Callers without
    /// a return path discard it.
    pub fn handle(&self, payload: &[u8], origin: &Origin) -> Option<Vec<u8>> {
        BridgeStats::incr(&self.stats.received);

        let (bytes, origin) = match self.unwrap_envelope(payload, origin) {
            Ok(unwrapped) => unwrapped,
            Err(e) => return Some(self.reject(e, origin)),
        };

        match self.codec.decode(&bytes) {
            Ok(decoded) => match self.mode {
                BridgeMode::Classify => Some(self.classify(&decoded, &origin)),
                BridgeMode::Forward => {
                    self.forward(bytes, decoded, origin);
                    None
                }
            },
            Err(e) => Some(self.reject(e, &origin)),
        }
    }

    fn unwrap_envelope(
        &self,
        payload: &[u8],
        origin: &Origin,
    ) -> Result<(Vec<u8>, Origin), DecodeError> {
        if !Envelope::sniff(payload) {
            return Ok((payload.to_vec(), origin.clone()));
        }
        let envelope = Envelope::from_json(payload)?;
        let bytes = envelope.payload()?;
        let mut origin = origin.clone();
        if !envelope.address.is_empty() {
            origin.address = envelope.address;
        }
        if !envelope.source.is_empty() {
            origin.source = envelope.source;
        }
        Ok((bytes, origin))
    }

    fn result_source<'a>(&'a self, origin: &'a Origin) -> &'a str {
        if origin.source.is_empty() {
            &self.source
        } else {
            &origin.source
        }
    }

    fn classify(&self, decoded: &Decoded, origin: &Origin) -> Vec<u8> {
        let (sequence, timestamp) = match decoded.header() {
            Some((seq, ts)) => (seq, ts as u64),
            None => (
                self.next_sequence.fetch_add(1, Ordering::Relaxed),
                now_ms(),
            ),
        };
        let derived = self.engine.derive(decoded.frames().frames());
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);

        let result = ClassificationResult::success(
            session_id,
            sequence,
            timestamp,
            decoded.frames(),
            &derived,
            decoded.format(),
        )
        .with_origin(self.result_source(origin), &origin.address);
        BridgeStats::incr(&self.stats.classified);

        log::debug!(
            "Session {} seq {}: {} / {} (battery {}%)",
            session_id,
            sequence,
            derived.state.emotion.as_str(),
            derived.state.activity.as_str(),
            derived.battery_level
        );

        let json = result.to_json();
        if self.publish_results {
            self.publish(TopicRole::Result, json.clone());
        }
        self.fan_out(OutboundMessage::Result {
            json: json.clone(),
            movement_class: result.movement_class,
            is_error: false,
            origin: origin.clone(),
        });
        json
    }

    fn forward(&self, raw: Vec<u8>, decoded: Decoded, origin: Origin) {
        let (sequence, timestamp) = decoded.header().unwrap_or_else(|| {
            (
                self.next_sequence.fetch_add(1, Ordering::Relaxed),
                now_ms() as u32,
            )
        });
        log::trace!(
            "Forwarding {} payload seq {} from {}",
            decoded.format().as_str(),
            sequence,
            origin.address
        );
        self.fan_out(OutboundMessage::Telemetry {
            raw,
            decoded,
            sequence,
            timestamp,
            origin,
        });
    }

    fn reject(&self, err: DecodeError, origin: &Origin) -> Vec<u8> {
        BridgeStats::incr(&self.stats.decode_errors);
        log::warn!("Rejected payload from {}: {}", origin.address, err);

        let json = ClassificationResult::error(err.to_string(), now_ms())
            .with_origin(self.result_source(origin), &origin.address)
            .to_json();
        if self.publish_errors {
            self.publish(TopicRole::Error, json.clone());
        }
        json
    }

    fn publish(&self, role: TopicRole, payload: Vec<u8>) {
        let Some(session) = &self.session else {
            return;
        };
        if let Err(e) = session.publish(role, payload) {
            BridgeStats::incr(&self.stats.dropped);
            log::warn!("Failed to publish {:?} message: {}", role, e);
        }
    }

    fn fan_out(&self, msg: OutboundMessage) {
        for link in self.outbound.iter().filter(|l| l.accepts(&msg)) {
            link.offer(msg.clone());
        }
    }

    /// Route a result or error that arrived on the broker
    ///
    /// Goes to the stream peer whose address it echoes and, for results
    /// carrying a movement class, to actuators. A message for no connected
    /// peer is dropped for the return path.
    pub fn handle_broker_result(&self, role: TopicRole, payload: &[u8]) {
        let route = ResultRoute::parse(payload);
        let delivery = match route.address.as_deref() {
            Some(address) => self.peers.route(address, payload),
            None => Default::default(),
        };
        if delivery.delivered == 0 {
            BridgeStats::incr(&self.stats.dropped);
            log::debug!(
                "{:?} message for {:?} matches no connected peer",
                role,
                route.address
            );
        } else {
            for _ in 0..delivery.dropped {
                BridgeStats::incr(&self.stats.dropped);
            }
            log::trace!("{:?} message delivered to {}", role, delivery.delivered);
        }

        if role != TopicRole::Result || route.movement_class.is_none() {
            return;
        }
        let msg = OutboundMessage::Result {
            json: payload.to_vec(),
            movement_class: route.movement_class,
            is_error: false,
            origin: Origin::broker(),
        };
        for link in self
            .outbound
            .iter()
            .filter(|l| l.kind() == OutboundKind::Actuator)
        {
            link.offer(msg.clone());
        }
    }
}
