//! Return-path registry for connected stream peers
//!
//! Each stream worker registers its peer address and receives an outbox.
//! Results that come back asynchronously (from a request/response hop or
//! the broker's result topic) are routed to the outbox of the peer whose
//! address they echo; a result naming no connected peer reaches nobody.
//! The owning worker drains its outbox between reads, so only that worker
//! ever writes to its socket.
//!
//! Datagram and pub/sub sources never register: they have no return path.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Registry-assigned peer identity
pub type PeerId = u64;

struct Peer {
    address: String,
    outbox: Sender<Vec<u8>>,
}

/// Outcome of a routing attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Outboxes that were full
    pub dropped: usize,
}

#[derive(Default)]
pub struct PeerRegistry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer; the receiver is its outbox
    pub fn register(&self, address: &str, capacity: usize) -> (PeerId, Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(capacity.max(1));
        self.peers.lock().insert(
            id,
            Peer {
                address: address.to_string(),
                outbox: tx,
            },
        );
        log::debug!("Registered return path for {} (peer {})", address, id);
        (id, rx)
    }

    pub fn unregister(&self, id: PeerId) {
        if let Some(peer) = self.peers.lock().remove(&id) {
            log::debug!("Removed return path for {} (peer {})", peer.address, id);
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn offer(peer: &Peer, payload: &[u8], delivery: &mut Delivery) {
        match peer.outbox.try_send(payload.to_vec()) {
            Ok(()) => delivery.delivered += 1,
            Err(TrySendError::Full(_)) => {
                log::warn!("Return queue for {} full, dropping result", peer.address);
                delivery.dropped += 1;
            }
            // Worker already exiting
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Deliver to one specific peer
    pub fn send_to(&self, id: PeerId, payload: &[u8]) -> Delivery {
        let mut delivery = Delivery::default();
        if let Some(peer) = self.peers.lock().get(&id) {
            Self::offer(peer, payload, &mut delivery);
        }
        delivery
    }

    /// Deliver to the peer connected from `address`
    ///
    /// Nothing is delivered when no connected peer has that address.
    pub fn route(&self, address: &str, payload: &[u8]) -> Delivery {
        let mut delivery = Delivery::default();
        if address.is_empty() {
            return delivery;
        }
        for peer in self.peers.lock().values().filter(|p| p.address == address) {
            Self::offer(peer, payload, &mut delivery);
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_by_address() {
        let registry = PeerRegistry::new();
        let (_, rx_a) = registry.register("10.0.0.1:1000", 4);
        let (_, rx_b) = registry.register("10.0.0.2:2000", 4);

        let d = registry.route("10.0.0.2:2000", b"result");
        assert_eq!(d.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), b"result");
    }

    #[test]
    fn test_unknown_or_empty_address_reaches_nobody() {
        let registry = PeerRegistry::new();
        let (_, rx_a) = registry.register("10.0.0.7:7777", 4);
        let (_, rx_b) = registry.register("10.0.0.8:8888", 4);

        assert_eq!(registry.route("10.0.0.1:1234", b"x"), Delivery::default());
        assert_eq!(registry.route("", b"y"), Delivery::default());
        assert!(rx_a.is_empty());
        assert!(rx_b.is_empty());
    }

    #[test]
    fn test_full_outbox_counts_drop() {
        let registry = PeerRegistry::new();
        let (id, _rx) = registry.register("a:1", 1);
        assert_eq!(registry.send_to(id, b"1").delivered, 1);
        assert_eq!(registry.send_to(id, b"2").dropped, 1);
    }

    #[test]
    fn test_unregister() {
        let registry = PeerRegistry::new();
        let (id, _rx) = registry.register("a:1", 1);
        assert_eq!(registry.len(), 1);
        registry.unregister(id);
        assert!(registry.is_empty());
        assert_eq!(registry.send_to(id, b"1"), Delivery::default());
    }
}
