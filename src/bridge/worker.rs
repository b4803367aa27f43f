//! Inbound workers
//!
//! # Stream connections
//!
//! One thread per accepted connection. The socket read timeout is the
//! bridge poll interval, so the loop wakes regularly to:
//!
//! 1. check the shutdown flag
//! 2. drain its return queue (results routed back by other threads)
//! 3. read the next message, process it, and write the reply
//!
//! Only this thread ever writes to its socket.
//!
//! | Failure | Reaction |
//! |---------|----------|
//! | decode error | error result sent back, connection continues |
//! | decrypt error | line discarded, connection continues |
//! | framing error | connection closed |
//! | peer EOF | connection closed |
//!
//! # Datagrams and broker messages
//!
//! A single thread each. Neither has a return path, so direct replies are
//! discarded (results from pub/sub ingress go out on the result topic).

use super::outbound::Origin;
use super::peers::PeerRegistry;
use super::pipeline::Pipeline;
use super::stats::BridgeStats;
use crate::error::TransportError;
use crate::secure::PayloadCipher;
use crate::secure::tls;
use crate::transport::framing::{FrameReader, write_frame};
use crate::transport::lines::{LineReader, write_line};
use crate::transport::{PubSubMessage, StreamLink, TopicRole, UdpTransport};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use rustls::ServerConfig;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Replies queued for one peer before results are dropped
const RETURN_QUEUE_CAPACITY: usize = 64;

/// Deadline for the TLS handshake and for writes to a peer
const PEER_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for inbound workers
#[derive(Clone)]
pub struct WorkerContext {
    pub pipeline: Arc<Pipeline>,
    pub peers: Arc<PeerRegistry>,
    pub stats: Arc<BridgeStats>,
    pub running: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

/// Message delimiting on one stream
pub enum StreamFramer {
    Frames(FrameReader),
    Lines {
        reader: LineReader,
        cipher: PayloadCipher,
    },
}

impl StreamFramer {
    pub fn frames() -> Self {
        StreamFramer::Frames(FrameReader::new())
    }

    pub fn lines(cipher: PayloadCipher) -> Self {
        StreamFramer::Lines {
            reader: LineReader::new(),
            cipher,
        }
    }
}

enum Incoming {
    Payload(Vec<u8>),
    /// Line that failed decryption
    Discarded,
    Idle,
}

pub struct StreamWorker {
    link: StreamLink,
    peer: String,
    framer: StreamFramer,
    ctx: WorkerContext,
}

impl StreamWorker {
    pub fn new(link: StreamLink, peer: &str, framer: StreamFramer, ctx: WorkerContext) -> Self {
        Self {
            link,
            peer: peer.to_string(),
            framer,
            ctx,
        }
    }

    fn read_next(&mut self) -> Result<Incoming, TransportError> {
        match &mut self.framer {
            StreamFramer::Frames(reader) => Ok(reader
                .read_frame(&mut self.link)?
                .map_or(Incoming::Idle, Incoming::Payload)),
            StreamFramer::Lines { reader, cipher } => {
                let Some(line) = reader.read_line(&mut self.link)? else {
                    return Ok(Incoming::Idle);
                };
                match cipher.decrypt_line(&line) {
                    Ok(plain) => Ok(Incoming::Payload(plain)),
                    Err(e) => {
                        BridgeStats::incr(&self.ctx.stats.decrypt_errors);
                        log::warn!("Discarding undecryptable line from {}: {}", self.peer, e);
                        Ok(Incoming::Discarded)
                    }
                }
            }
        }
    }

    fn write_reply(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match &self.framer {
            StreamFramer::Frames(_) => write_frame(&mut self.link, payload),
            StreamFramer::Lines { cipher, .. } => {
                let line = cipher.encrypt_line(payload);
                write_line(&mut self.link, &line)
            }
        }
    }

    /// Serve the connection until EOF, a fatal error or shutdown
    pub fn run(mut self) {
        if let Err(e) = self.link.set_read_timeout(Some(self.ctx.poll_interval)) {
            log::warn!("Failed to set read timeout for {}: {}", self.peer, e);
        }
        if let Err(e) = self.link.set_write_timeout(Some(PEER_IO_TIMEOUT)) {
            log::warn!("Failed to set write timeout for {}: {}", self.peer, e);
        }

        let (id, outbox) = self.ctx.peers.register(&self.peer, RETURN_QUEUE_CAPACITY);
        let origin = Origin::stream(id, &self.peer);
        self.ctx.stats.connections.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Client connected: {}{}",
            self.peer,
            if self.link.is_tls() { " (TLS)" } else { "" }
        );

        if let Err(e) = self.serve(&origin, &outbox) {
            if e.is_framing() {
                log::warn!("Closing {}: {}", self.peer, e);
            } else {
                log::info!("Connection {} ended: {}", self.peer, e);
            }
        }

        self.ctx.peers.unregister(id);
        self.ctx.stats.connections.fetch_sub(1, Ordering::Relaxed);
        self.link.close();
        log::info!("Client disconnected: {}", self.peer);
    }

    fn serve(&mut self, origin: &Origin, outbox: &Receiver<Vec<u8>>) -> Result<(), TransportError> {
        while self.ctx.running.load(Ordering::Relaxed) {
            while let Ok(routed) = outbox.try_recv() {
                self.write_reply(&routed)?;
            }

            match self.read_next() {
                Ok(Incoming::Payload(payload)) => {
                    if let Some(reply) = self.ctx.pipeline.handle(&payload, origin) {
                        self.write_reply(&reply)?;
                    }
                }
                Ok(Incoming::Discarded) | Ok(Incoming::Idle) => {}
                Err(TransportError::Closed) => return Ok(()),
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e),
            }
        }
        log::debug!("Shutdown requested, closing {}", self.peer);
        Ok(())
    }
}

/// Handshake (if TLS) and serve one accepted socket
pub fn serve_connection(
    sock: TcpStream,
    addr: SocketAddr,
    tls_config: Option<Arc<ServerConfig>>,
    cipher: Option<PayloadCipher>,
    ctx: WorkerContext,
) {
    if let Err(e) = sock.set_nonblocking(false) {
        log::error!("Failed to set {} to blocking mode: {}", addr, e);
        return;
    }
    let _ = sock.set_nodelay(true);

    let link = match tls_config {
        Some(config) => {
            let _ = sock.set_read_timeout(Some(PEER_IO_TIMEOUT));
            let _ = sock.set_write_timeout(Some(PEER_IO_TIMEOUT));
            match tls::accept(sock, config) {
                Ok(stream) => StreamLink::TlsServer(Box::new(stream)),
                Err(e) => {
                    log::warn!("TLS handshake with {} failed: {}", addr, e);
                    return;
                }
            }
        }
        None => StreamLink::Plain(sock),
    };

    let framer = match cipher {
        Some(cipher) => StreamFramer::lines(cipher),
        None => StreamFramer::frames(),
    };
    StreamWorker::new(link, &addr.to_string(), framer, ctx).run();
}

/// Receive loop for datagram ingress
pub fn run_datagrams(mut transport: UdpTransport, ctx: WorkerContext) {
    while ctx.running.load(Ordering::Relaxed) {
        match transport.recv_from() {
            Ok(Some((payload, from))) => {
                let _ = ctx
                    .pipeline
                    .handle(&payload, &Origin::datagram(&from.to_string()));
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("Datagram receive failed: {}", e);
                std::thread::sleep(ctx.poll_interval);
            }
        }
    }
    log::debug!("Datagram worker stopped");
}

/// Handler for messages delivered by the broker session
pub fn run_broker_messages(rx: Receiver<PubSubMessage>, ctx: WorkerContext) {
    while ctx.running.load(Ordering::Relaxed) {
        match rx.recv_timeout(ctx.poll_interval) {
            Ok(msg) => match msg.role {
                TopicRole::Telemetry => {
                    let _ = ctx.pipeline.handle(&msg.payload, &Origin::broker());
                }
                TopicRole::Result | TopicRole::Error => {
                    ctx.pipeline.handle_broker_result(msg.role, &msg.payload);
                }
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("Broker message worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::packet;
    use crate::config::Config;
    use crate::types::{SensorBatch, TelemetryPacket};
    use std::net::TcpListener;
    use std::thread;

    fn context(running: Arc<AtomicBool>) -> WorkerContext {
        let stats = Arc::new(BridgeStats::default());
        let peers = Arc::new(PeerRegistry::new());
        let pipeline = Arc::new(Pipeline::new(
            &Config::default(),
            Arc::clone(&stats),
            Arc::clone(&peers),
            Vec::new(),
            None,
        ));
        WorkerContext {
            pipeline,
            peers,
            stats,
            running,
            poll_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_routed_results_reach_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let ctx = context(Arc::clone(&running));
        let peers = Arc::clone(&ctx.peers);

        let server = thread::spawn(move || {
            let (sock, from) = listener.accept().unwrap();
            serve_connection(sock, from, None, None, ctx);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = FrameReader::new();

        // Direct reply
        let bytes = packet::encode(&TelemetryPacket::new(1, 2, SensorBatch::zeroed()));
        write_frame(&mut client, &bytes).unwrap();
        let reply = reader.read_frame(&mut client).unwrap().unwrap();
        assert!(String::from_utf8_lossy(&reply).contains("\"success\""));

        // Result routed from elsewhere
        while peers.is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        let own_address = client.local_addr().unwrap().to_string();
        peers.route(&own_address, b"{\"routed\":true}");
        let routed = reader.read_frame(&mut client).unwrap().unwrap();
        assert_eq!(routed, b"{\"routed\":true}");

        drop(client);
        server.join().unwrap();
        assert!(peers.is_empty());
        running.store(false, Ordering::Relaxed);
    }

    #[test]
    fn test_framing_error_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let ctx = context(Arc::clone(&running));

        let server = thread::spawn(move || {
            let (sock, from) = listener.accept().unwrap();
            serve_connection(sock, from, None, None, ctx);
        });

        let mut client = TcpStream::connect(addr).unwrap();
        // Announce a frame over the 1MB limit
        std::io::Write::write_all(&mut client, &(2u32 * 1024 * 1024).to_be_bytes()).unwrap();
        server.join().unwrap();
        running.store(false, Ordering::Relaxed);
    }
}
