//! Message counters
//!
//! Sent/received counts keyed by (peer, message type), maintained by the
//! endpoints: exactly one increment per emitted datagram and one per
//! successfully parsed datagram. Exporting them to a metrics backend is the
//! consumer's concern; `snapshot` hands out the current values.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MessageCounters {
    sent: Mutex<HashMap<(SocketAddr, u8), u64>>,
    received: Mutex<HashMap<(SocketAddr, u8), u64>>,
}

impl MessageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_sent(&self, peer: SocketAddr, msg_type: u8) {
        *self
            .sent
            .lock()
            .expect("counter lock poisoned")
            .entry((peer, msg_type))
            .or_insert(0) += 1;
    }

    pub fn inc_received(&self, peer: SocketAddr, msg_type: u8) {
        *self
            .received
            .lock()
            .expect("counter lock poisoned")
            .entry((peer, msg_type))
            .or_insert(0) += 1;
    }

    pub fn sent(&self, peer: SocketAddr, msg_type: u8) -> u64 {
        self.sent
            .lock()
            .expect("counter lock poisoned")
            .get(&(peer, msg_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn received(&self, peer: SocketAddr, msg_type: u8) -> u64 {
        self.received
            .lock()
            .expect("counter lock poisoned")
            .get(&(peer, msg_type))
            .copied()
            .unwrap_or(0)
    }

    /// Current (sent, received) maps for export.
    pub fn snapshot(
        &self,
    ) -> (
        HashMap<(SocketAddr, u8), u64>,
        HashMap<(SocketAddr, u8), u64>,
    ) {
        (
            self.sent.lock().expect("counter lock poisoned").clone(),
            self.received.lock().expect("counter lock poisoned").clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_peer_and_type() {
        let counters = MessageCounters::new();
        let a: SocketAddr = "10.0.0.1:2123".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:2123".parse().unwrap();

        counters.inc_sent(a, 32);
        counters.inc_sent(a, 32);
        counters.inc_sent(b, 32);
        counters.inc_received(a, 33);

        assert_eq!(counters.sent(a, 32), 2);
        assert_eq!(counters.sent(b, 32), 1);
        assert_eq!(counters.received(a, 33), 1);
        assert_eq!(counters.received(b, 33), 0);

        let (sent, received) = counters.snapshot();
        assert_eq!(sent.len(), 2);
        assert_eq!(received.len(), 1);
    }
}
