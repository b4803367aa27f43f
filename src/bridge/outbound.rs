//! Outbound links
//!
//! Every configured `[[outbound]]` entry gets its own thread and a bounded
//! queue. The pipeline never blocks on a slow or absent downstream: a full
//! queue drops the message and counts it.
//!
//! # Reconnection
//!
//! ```text
//! ┌──────────────┐ connect ok ┌───────────┐ deliver err ┌────────────┐
//! │ Disconnected ├───────────▶│ Connected ├────────────▶│ wait delay │
//! └──────▲───────┘            └───────────┘             └─────┬──────┘
//!        │ connect err → wait delay                           │
//!        └────────────────────────────────────────────────────┘
//! ```
//!
//! A message whose delivery failed stays pending and is retried once the
//! link is back, so nothing queued is lost to a reconnect.
//!
//! # What each link does with each message
//!
//! | Kind | Telemetry | Result |
//! |------|-----------|--------|
//! | `tcp` | frame (re-encoded if `codec` is set); reply routed back when `expect_reply` | frame |
//! | `udp` | datagram | datagram |
//! | `pubsub` | telemetry topic, raw or enveloped | result or error topic |
//! | `actuator` | ignored | encrypted movement-class block |

use super::actuator::ActuatorLink;
use super::peers::{PeerId, PeerRegistry};
use super::result::ClassificationResult;
use super::stats::BridgeStats;
use crate::codec::envelope::now_ms;
use crate::codec::{CodecVariant, Decoded, Envelope};
use crate::config::{OutboundConfig, OutboundKind};
use crate::error::{Error, Result, TransportError};
use crate::secure::{ClientTls, PayloadCipher};
use crate::transport::pubsub::pause;
use crate::transport::{FrameTransport, PubSubSession, TcpFrameTransport, TopicRole, UdpTransport};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where an inbound payload came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    /// Stream peer with a return path
    pub peer: Option<PeerId>,
    /// Peer address, echoed into results
    pub address: String,
    /// Producer name from an envelope
    pub source: String,
}

impl Origin {
    pub fn stream(peer: PeerId, address: &str) -> Self {
        Self {
            peer: Some(peer),
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn datagram(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    /// Delivered by the broker; no return path
    pub fn broker() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Verified telemetry on its way to the compute side
    Telemetry {
        raw: Vec<u8>,
        decoded: Decoded,
        sequence: u32,
        timestamp: u32,
        origin: Origin,
    },
    /// Result or error JSON
    Result {
        json: Vec<u8>,
        movement_class: Option<u8>,
        is_error: bool,
        origin: Origin,
    },
}

/// Shared state every link worker needs
#[derive(Clone)]
pub struct LinkContext {
    pub peers: Arc<PeerRegistry>,
    pub stats: Arc<BridgeStats>,
    /// Bridge name stamped into envelopes and synthesized results
    pub source: String,
    pub running: Arc<AtomicBool>,
    /// Granularity of the worker's shutdown checks
    pub poll_interval: Duration,
}

/// One downstream connection driven by a link worker
pub(crate) trait Link: Send {
    fn connect(&mut self) -> std::result::Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn deliver(&mut self, msg: &OutboundMessage) -> std::result::Result<(), TransportError>;
    fn disconnect(&mut self);
}

fn encode_telemetry(codec: Option<CodecVariant>, msg: &OutboundMessage) -> Vec<u8> {
    match msg {
        OutboundMessage::Telemetry {
            raw,
            decoded,
            sequence,
            timestamp,
            ..
        } => match codec {
            Some(variant) => variant.encode(decoded, *sequence, *timestamp),
            None => raw.clone(),
        },
        OutboundMessage::Result { json, .. } => json.clone(),
    }
}

/// Length-prefixed stream to a downstream node
struct TcpLink {
    name: String,
    address: String,
    codec: Option<CodecVariant>,
    expect_reply: bool,
    tls: Option<ClientTls>,
    connect_timeout: Duration,
    io_timeout: Duration,
    transport: Option<TcpFrameTransport>,
    ctx: LinkContext,
}

impl TcpLink {
    fn return_reply(&self, origin: &Origin, reply: &[u8]) {
        let Some(peer) = origin.peer else {
            log::debug!("[{}] Reply for {} has no return path", self.name, origin.address);
            return;
        };
        let delivery = self.ctx.peers.send_to(peer, reply);
        for _ in 0..delivery.dropped {
            BridgeStats::incr(&self.ctx.stats.dropped);
        }
    }
}

impl Link for TcpLink {
    fn connect(&mut self) -> std::result::Result<(), TransportError> {
        let transport = TcpFrameTransport::connect(
            &self.address,
            self.tls.as_ref(),
            self.connect_timeout,
            self.io_timeout,
        )?;
        self.transport = Some(transport);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn deliver(&mut self, msg: &OutboundMessage) -> std::result::Result<(), TransportError> {
        let payload = encode_telemetry(self.codec, msg);
        let transport = self.transport.as_mut().ok_or(TransportError::NotConnected)?;
        transport.send(&payload)?;

        let OutboundMessage::Telemetry { origin, .. } = msg else {
            return Ok(());
        };
        if !self.expect_reply {
            return Ok(());
        }

        // The message was delivered; a missing reply desynchronizes the
        // stream, so answer the sender with an error and start over.
        match transport.receive() {
            Ok(reply) => self.return_reply(origin, &reply),
            Err(e) => {
                log::warn!("[{}] No reply from {}: {}", self.name, self.address, e);
                let error = ClassificationResult::error(
                    format!("no reply from {}: {}", self.name, e),
                    now_ms(),
                )
                .with_origin(&self.ctx.source, &origin.address);
                self.return_reply(origin, &error.to_json());
                self.disconnect();
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
    }
}

/// Fire-and-forget datagrams
struct UdpLink {
    address: String,
    codec: Option<CodecVariant>,
    io_timeout: Duration,
    transport: Option<UdpTransport>,
}

impl Link for UdpLink {
    fn connect(&mut self) -> std::result::Result<(), TransportError> {
        self.transport = Some(UdpTransport::sender(&self.address, self.io_timeout)?);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn deliver(&mut self, msg: &OutboundMessage) -> std::result::Result<(), TransportError> {
        let payload = encode_telemetry(self.codec, msg);
        self.transport
            .as_mut()
            .ok_or(TransportError::NotConnected)?
            .send(&payload)
    }

    fn disconnect(&mut self) {
        self.transport = None;
    }
}

/// Publisher on the shared broker session
struct PubSubLink {
    session: Arc<PubSubSession>,
    codec: Option<CodecVariant>,
    envelope: bool,
    source: String,
}

impl Link for PubSubLink {
    fn connect(&mut self) -> std::result::Result<(), TransportError> {
        // The session's event loop owns reconnection
        if self.session.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn deliver(&mut self, msg: &OutboundMessage) -> std::result::Result<(), TransportError> {
        match msg {
            OutboundMessage::Telemetry { origin, .. } => {
                let payload = encode_telemetry(self.codec, msg);
                let body = if self.envelope {
                    Envelope::wrap(&payload, &self.source, &origin.address).to_json()
                } else {
                    payload
                };
                self.session.publish(TopicRole::Telemetry, body)
            }
            OutboundMessage::Result { json, is_error, .. } => {
                let role = if *is_error {
                    TopicRole::Error
                } else {
                    TopicRole::Result
                };
                self.session.publish(role, json.clone())
            }
        }
    }

    fn disconnect(&mut self) {}
}

/// Producer side of one link worker
pub struct OutboundHandle {
    name: String,
    kind: OutboundKind,
    tx: Sender<OutboundMessage>,
    stats: Arc<BridgeStats>,
}

impl OutboundHandle {
    /// Build the link described by `config` and start its worker thread
    pub fn spawn(
        config: &OutboundConfig,
        ctx: LinkContext,
        session: Option<&Arc<PubSubSession>>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let link: Box<dyn Link> = match config.kind {
            OutboundKind::Tcp => Box::new(TcpLink {
                name: config.name.clone(),
                address: config.address.clone(),
                codec: config.codec,
                expect_reply: config.expect_reply,
                tls: config
                    .tls
                    .as_ref()
                    .map(|tls| ClientTls::from_config(tls, &config.address))
                    .transpose()?,
                connect_timeout: config.connect_timeout(),
                io_timeout: config.io_timeout(),
                transport: None,
                ctx: ctx.clone(),
            }),
            OutboundKind::Udp => Box::new(UdpLink {
                address: config.address.clone(),
                codec: config.codec,
                io_timeout: config.io_timeout(),
                transport: None,
            }),
            OutboundKind::Pubsub => {
                let session = session.ok_or_else(|| {
                    Error::Config(format!("outbound {} needs a [pubsub] section", config.name))
                })?;
                Box::new(PubSubLink {
                    session: Arc::clone(session),
                    codec: config.codec,
                    envelope: config.envelope,
                    source: ctx.source.clone(),
                })
            }
            OutboundKind::Actuator => {
                let cipher = config.cipher.as_ref().ok_or_else(|| {
                    Error::Config(format!("actuator {} needs a cipher", config.name))
                })?;
                Box::new(ActuatorLink::new(config, PayloadCipher::from_config(cipher)?))
            }
        };

        let (tx, rx) = bounded(config.buffer_capacity.max(1));
        let stats = Arc::clone(&ctx.stats);
        let worker = LinkWorker {
            name: config.name.clone(),
            link,
            rx,
            reconnect_delay: config.reconnect_delay(),
            ctx,
        };
        let handle = thread::Builder::new()
            .name(format!("link-{}", config.name))
            .spawn(move || worker.run())
            .map_err(|e| Error::Other(format!("Failed to spawn link {}: {}", config.name, e)))?;

        log::info!(
            "Outbound {} ({:?}) -> {}",
            config.name,
            config.kind,
            if config.address.is_empty() {
                "broker"
            } else {
                &config.address
            }
        );

        Ok((
            Self {
                name: config.name.clone(),
                kind: config.kind,
                tx,
                stats,
            },
            handle,
        ))
    }

    pub fn kind(&self) -> OutboundKind {
        self.kind
    }

    /// Whether this link has anything to do with `msg`
    pub fn accepts(&self, msg: &OutboundMessage) -> bool {
        match (self.kind, msg) {
            (OutboundKind::Actuator, OutboundMessage::Result { movement_class, .. }) => {
                movement_class.is_some()
            }
            (OutboundKind::Actuator, OutboundMessage::Telemetry { .. }) => false,
            _ => true,
        }
    }

    /// Queue without blocking; a full queue drops and counts
    pub fn offer(&self, msg: OutboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                BridgeStats::incr(&self.stats.dropped);
                log::warn!("[{}] Queue full, dropping message", self.name);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                BridgeStats::incr(&self.stats.dropped);
                log::debug!("[{}] Link stopped, dropping message", self.name);
                false
            }
        }
    }
}

#[cfg(test)]
impl OutboundHandle {
    /// Relabel the link so routing can be tested against any transport
    pub(crate) fn set_kind(&mut self, kind: OutboundKind) {
        self.kind = kind;
    }
}

struct LinkWorker {
    name: String,
    link: Box<dyn Link>,
    rx: Receiver<OutboundMessage>,
    reconnect_delay: Duration,
    ctx: LinkContext,
}

impl LinkWorker {
    fn running(&self) -> bool {
        self.ctx.running.load(Ordering::Relaxed)
    }

    fn run(mut self) {
        let mut pending: Option<OutboundMessage> = None;
        let mut announced_down = false;

        while self.running() {
            if !self.link.is_connected() {
                match self.link.connect() {
                    Ok(()) => {
                        log::info!("[{}] Connected", self.name);
                        announced_down = false;
                    }
                    Err(e) => {
                        if !announced_down {
                            log::warn!(
                                "[{}] Unavailable: {}, retrying every {:?}",
                                self.name,
                                e,
                                self.reconnect_delay
                            );
                            announced_down = true;
                        } else {
                            log::debug!("[{}] Still unavailable: {}", self.name, e);
                        }
                        BridgeStats::incr(&self.ctx.stats.reconnects);
                        pause(&self.ctx.running, self.reconnect_delay);
                        continue;
                    }
                }
            }

            if pending.is_none() {
                match self.rx.recv_timeout(self.ctx.poll_interval) {
                    Ok(msg) => pending = Some(msg),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            let Some(msg) = pending.as_ref() else {
                continue;
            };

            match self.link.deliver(msg) {
                Ok(()) => {
                    BridgeStats::incr(&self.ctx.stats.forwarded);
                    pending = None;
                }
                Err(e) if e.is_framing() => {
                    log::warn!("[{}] Cannot send message: {}", self.name, e);
                    BridgeStats::incr(&self.ctx.stats.dropped);
                    pending = None;
                }
                Err(e) => {
                    log::warn!("[{}] Send failed: {}, reconnecting", self.name, e);
                    self.link.disconnect();
                    BridgeStats::incr(&self.ctx.stats.reconnects);
                    pause(&self.ctx.running, self.reconnect_delay);
                }
            }
        }

        if pending.is_some() {
            BridgeStats::incr(&self.ctx.stats.dropped);
        }
        self.link.disconnect();
        log::debug!("[{}] Link worker stopped", self.name);
    }
}
