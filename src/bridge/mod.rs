//! Relay bridge
//!
//! Wires one inbound transport to any number of outbound links through the
//! processing [`pipeline`]:
//!
//! ```text
//!                  ┌──────────────┐      ┌──────────┐      ┌─────────────┐
//! tcp / udp / ───▶ │ worker(s)    ├─────▶│ pipeline ├─────▶│ link queues ├──▶ tcp / udp /
//! pubsub           │ per conn.    │◀─────┤          │      └─────────────┘    pubsub / actuator
//!                  └──────▲───────┘reply └──────────┘
//!                         │ routed results (peer registry)
//! ```
//!
//! # Threads
//!
//! | Thread | Count |
//! |--------|-------|
//! | `accept` | 1 for stream ingress |
//! | `conn-<addr>` | 1 per connected peer |
//! | `udp-ingress` | 1 for datagram ingress |
//! | `broker-handler` + `pubsub-events` | 1 each when a broker session exists |
//! | `link-<name>` | 1 per outbound link |
//!
//! # Shutdown
//!
//! [`RelayBridge::shutdown`] clears the running flag, joins inbound workers
//! (each finishes the message in hand), joins link workers, then closes the
//! broker session.

pub mod actuator;
pub mod outbound;
pub mod peers;
pub mod pipeline;
pub mod result;
pub mod stats;
pub mod worker;

pub use outbound::{OutboundHandle, OutboundMessage, Origin};
pub use peers::PeerRegistry;
pub use pipeline::Pipeline;
pub use result::ClassificationResult;
pub use stats::{BridgeStats, StatsSnapshot};

use crate::config::{Config, InboundKind, OutboundKind, StreamFraming};
use crate::error::{Error, Result};
use crate::secure::{PayloadCipher, tls};
use crate::transport::{PubSubSession, UdpTransport};
use outbound::LinkContext;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use worker::WorkerContext;

/// Sleep between accept polls
const ACCEPT_POLL: Duration = Duration::from_millis(10);

type ThreadList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// A started bridge
pub struct RelayBridge {
    running: Arc<AtomicBool>,
    stats: Arc<BridgeStats>,
    local_addr: Option<SocketAddr>,
    session: Option<Arc<PubSubSession>>,
    inbound: Vec<JoinHandle<()>>,
    connections: ThreadList,
    links: Vec<JoinHandle<()>>,
}

fn spawn_named<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| Error::Other(format!("Failed to spawn {}: {}", name, e)))
}

impl RelayBridge {
    /// Validate `config`, open every transport and start all workers
    ///
    /// `running` is shared with the caller; clearing it stops the bridge.
    pub fn start(config: &Config, running: Arc<AtomicBool>) -> Result<Self> {
        config.validate()?;
        let stats = Arc::new(BridgeStats::default());
        let peers = Arc::new(PeerRegistry::new());

        // Broker session, if anything uses it
        let has_pubsub_link = config
            .outbound
            .iter()
            .any(|o| o.kind == OutboundKind::Pubsub);
        let broker = if config.inbound.kind == InboundKind::Pubsub || has_pubsub_link {
            let pubsub = config
                .pubsub
                .as_ref()
                .ok_or_else(|| Error::Config("pub/sub links need a [pubsub] section".into()))?;
            Some(PubSubSession::connect(
                pubsub,
                pipeline::broker_subscriptions(config),
                Arc::clone(&running),
            )?)
        } else {
            None
        };
        let session = broker.as_ref().map(|(s, _)| Arc::clone(s));

        // Outbound links
        let link_ctx = LinkContext {
            peers: Arc::clone(&peers),
            stats: Arc::clone(&stats),
            source: config.bridge.name.clone(),
            running: Arc::clone(&running),
            poll_interval: config.bridge.poll_interval(),
        };
        let mut handles = Vec::with_capacity(config.outbound.len());
        let mut links = Vec::with_capacity(config.outbound.len());
        for outbound in &config.outbound {
            let (handle, join) =
                OutboundHandle::spawn(outbound, link_ctx.clone(), session.as_ref())?;
            handles.push(handle);
            links.push(join);
        }

        let pipeline = Arc::new(Pipeline::new(
            config,
            Arc::clone(&stats),
            Arc::clone(&peers),
            handles,
            session.clone(),
        ));
        let ctx = WorkerContext {
            pipeline,
            peers,
            stats: Arc::clone(&stats),
            running: Arc::clone(&running),
            poll_interval: config.bridge.poll_interval(),
        };

        let connections: ThreadList = Arc::new(Mutex::new(Vec::new()));
        let mut inbound = Vec::new();
        let local_addr = match config.inbound.kind {
            InboundKind::Tcp => {
                let (addr, handle) =
                    Self::start_stream_ingress(config, ctx.clone(), Arc::clone(&connections))?;
                inbound.push(handle);
                Some(addr)
            }
            InboundKind::Udp => {
                let transport =
                    UdpTransport::bind(&config.inbound.bind_address, config.bridge.poll_interval())
                        .map_err(|e| {
                            Error::Other(format!(
                                "Failed to bind {}: {}",
                                config.inbound.bind_address, e
                            ))
                        })?;
                let addr = transport.local_addr()?;
                log::info!("UDP ingress listening on {}", addr);
                let udp_ctx = ctx.clone();
                inbound.push(spawn_named("udp-ingress".to_string(), move || {
                    worker::run_datagrams(transport, udp_ctx)
                })?);
                Some(addr)
            }
            InboundKind::Pubsub => {
                log::info!("Broker ingress on {:?} topic", config.inbound.topic);
                None
            }
        };

        if let Some((_, rx)) = broker {
            let broker_ctx = ctx.clone();
            inbound.push(spawn_named("broker-handler".to_string(), move || {
                worker::run_broker_messages(rx, broker_ctx)
            })?);
        }

        log::info!(
            "Bridge {} running in {:?} mode with {} outbound link(s)",
            config.bridge.name,
            config.bridge.mode,
            config.outbound.len()
        );

        Ok(Self {
            running,
            stats,
            local_addr,
            session,
            inbound,
            connections,
            links,
        })
    }

    fn start_stream_ingress(
        config: &Config,
        ctx: WorkerContext,
        connections: ThreadList,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let bind_addr = &config.inbound.bind_address;
        let listener = TcpListener::bind(bind_addr)
            .map_err(|e| Error::Other(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        if let Err(e) = listener.set_nonblocking(true) {
            log::warn!("Failed to set nonblocking mode: {}", e);
        }
        let addr = listener.local_addr()?;

        let tls_config = config
            .inbound
            .tls
            .as_ref()
            .map(tls::server_config)
            .transpose()?;
        let cipher = match config.inbound.framing {
            StreamFraming::EncryptedLines => config
                .inbound
                .cipher
                .as_ref()
                .map(PayloadCipher::from_config)
                .transpose()?,
            StreamFraming::LengthPrefixed => None,
        };

        log::info!(
            "TCP ingress listening on {} ({}{})",
            addr,
            match config.inbound.framing {
                StreamFraming::LengthPrefixed => "length-prefixed",
                StreamFraming::EncryptedLines => "encrypted lines",
            },
            if tls_config.is_some() { ", TLS" } else { "" }
        );

        let handle = spawn_named("accept".to_string(), move || {
            while ctx.running.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((sock, from)) => {
                        let conn_ctx = ctx.clone();
                        let conn_tls = tls_config.clone();
                        let conn_cipher = cipher.clone();
                        let spawned = spawn_named(format!("conn-{}", from), move || {
                            worker::serve_connection(sock, from, conn_tls, conn_cipher, conn_ctx)
                        });
                        match spawned {
                            Ok(handle) => {
                                let mut threads = connections.lock();
                                threads.retain(|h| !h.is_finished());
                                threads.push(handle);
                            }
                            Err(e) => log::error!("{}", e),
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL);
                    }
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                        thread::sleep(ACCEPT_POLL);
                    }
                }
            }
            log::debug!("Accept loop stopped");
        })?;
        Ok((addr, handle))
    }

    /// Bound address of stream or datagram ingress
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Counters, including those kept by the broker session
    pub fn stats(&self) -> StatsSnapshot {
        let mut snap = self.stats.snapshot();
        if let Some(session) = &self.session {
            snap.dropped += session.dropped();
            snap.reconnects += session.reconnects();
        }
        snap
    }

    /// Block until the running flag clears, logging stats every `interval`
    pub fn wait(&self, interval: Option<Duration>) {
        let mut last = Instant::now();
        while self.is_running() {
            thread::sleep(Duration::from_millis(100));
            if let Some(interval) = interval
                && last.elapsed() >= interval
            {
                log::info!("Stats: {}", self.stats());
                last = Instant::now();
            }
        }
    }

    /// Stop every worker and close the broker session
    pub fn shutdown(self) {
        log::info!("Shutting down...");
        self.running.store(false, Ordering::Relaxed);

        for handle in self.inbound {
            let _ = handle.join();
        }
        let connections: Vec<JoinHandle<()>> = self.connections.lock().drain(..).collect();
        for handle in connections {
            let _ = handle.join();
        }
        for handle in self.links {
            let _ = handle.join();
        }

        let mut snap = self.stats.snapshot();
        if let Some(session) = &self.session {
            snap.dropped += session.dropped();
            snap.reconnects += session.reconnects();
            session.shutdown();
        }
        log::info!("Final stats: {}", snap);
    }
}
