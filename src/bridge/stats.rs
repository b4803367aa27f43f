//! Observable bridge counters
//!
//! Every message that does not reach its destination increments exactly
//! one of these. Nothing is lost silently.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BridgeStats {
    /// Inbound payloads handed to the pipeline
    pub received: AtomicU64,
    /// Messages delivered on an outbound link
    pub forwarded: AtomicU64,
    /// Results produced by classification
    pub classified: AtomicU64,
    /// Payloads rejected by the codec
    pub decode_errors: AtomicU64,
    /// Lines rejected by the payload cipher
    pub decrypt_errors: AtomicU64,
    /// Messages discarded because a bounded queue was full
    pub dropped: AtomicU64,
    /// Outbound connect attempts that failed or links that were re-opened
    pub reconnects: AtomicU64,
    /// Currently connected stream peers
    pub connections: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub classified: u64,
    pub decode_errors: u64,
    pub decrypt_errors: u64,
    pub dropped: u64,
    pub reconnects: u64,
    pub connections: u64,
}

impl BridgeStats {
    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: get(&self.received),
            forwarded: get(&self.forwarded),
            classified: get(&self.classified),
            decode_errors: get(&self.decode_errors),
            decrypt_errors: get(&self.decrypt_errors),
            dropped: get(&self.dropped),
            reconnects: get(&self.reconnects),
            connections: get(&self.connections),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} forwarded={} classified={} decode_errors={} decrypt_errors={} \
             dropped={} reconnects={} connections={}",
            self.received,
            self.forwarded,
            self.classified,
            self.decode_errors,
            self.decrypt_errors,
            self.dropped,
            self.reconnects,
            self.connections
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = BridgeStats::default();
        BridgeStats::incr(&stats.received);
        BridgeStats::incr(&stats.received);
        BridgeStats::incr(&stats.dropped);
        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.forwarded, 0);
        assert!(snap.to_string().contains("dropped=1"));
    }
}
