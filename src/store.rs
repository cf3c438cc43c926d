//! Session registry
//!
//! Thread-safe store indexing sessions three ways: by local TEID, by IMSI
//! and by peer address. All indices live behind a single lock so insertion
//! and removal are atomic with respect to concurrent lookups, and removal
//! never leaves a stale entry behind.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};

use crate::error::{GtpError, GtpResult};
use crate::session::Session;

#[derive(Debug, Default)]
struct Indices {
    by_teid: HashMap<u32, Arc<Session>>,
    by_imsi: HashMap<String, Arc<Session>>,
    by_peer: HashMap<IpAddr, Vec<Arc<Session>>>,
}

/// In-memory session store shared by a connection and its handlers.
#[derive(Debug, Default)]
pub struct SessionStore {
    indices: RwLock<Indices>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Indices> {
        self.indices.read().expect("store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Indices> {
        self.indices.write().expect("store lock poisoned")
    }

    /// Register `session` under a freshly assigned local TEID. The IMSI and
    /// peer indices are refreshed from the session's current state in the
    /// same critical section.
    pub fn register(&self, teid: u32, session: &Arc<Session>) {
        session.record_local_teid(teid);
        let imsi = session.imsi();
        let peer_ip = session.peer_addr().map(|a| a.ip());

        let mut indices = self.write();
        indices.by_teid.insert(teid, Arc::clone(session));
        if !imsi.is_empty() {
            indices.by_imsi.insert(imsi, Arc::clone(session));
        }
        if let Some(ip) = peer_ip {
            let peers = indices.by_peer.entry(ip).or_default();
            if !peers.iter().any(|s| Arc::ptr_eq(s, session)) {
                peers.push(Arc::clone(session));
            }
        }
    }

    /// Refresh the IMSI index after a handler learned the subscriber
    /// identity of an already-registered session.
    pub fn index_by_imsi(&self, session: &Arc<Session>) {
        let imsi = session.imsi();
        if imsi.is_empty() {
            return;
        }
        self.write().by_imsi.insert(imsi, Arc::clone(session));
    }

    /// Session registered under `teid`, verified against the sender.
    pub fn get_by_teid(&self, teid: u32, peer: SocketAddr) -> GtpResult<Arc<Session>> {
        let indices = self.read();
        let session = indices
            .by_teid
            .get(&teid)
            .ok_or(GtpError::UnknownTeid { teid, peer })?;
        match session.peer_addr() {
            Some(addr) if addr.ip() == peer.ip() => Ok(Arc::clone(session)),
            _ => Err(GtpError::UnknownTeid { teid, peer }),
        }
    }

    pub fn get_by_imsi(&self, imsi: &str) -> GtpResult<Arc<Session>> {
        self.read()
            .by_imsi
            .get(imsi)
            .cloned()
            .ok_or_else(|| GtpError::UnknownImsi(imsi.to_owned()))
    }

    /// Every session whose peer has the given address.
    pub fn get_by_peer(&self, peer: IpAddr) -> Vec<Arc<Session>> {
        self.read().by_peer.get(&peer).cloned().unwrap_or_default()
    }

    /// Drop every index entry for `session`.
    pub fn remove(&self, session: &Arc<Session>) {
        let teids = session.local_teids();
        let imsi = session.imsi();
        let peer_ip = session.peer_addr().map(|a| a.ip());

        let mut indices = self.write();
        for teid in teids {
            if let Some(found) = indices.by_teid.get(&teid) {
                if Arc::ptr_eq(found, session) {
                    indices.by_teid.remove(&teid);
                }
            }
        }
        if let Some(found) = indices.by_imsi.get(&imsi) {
            if Arc::ptr_eq(found, session) {
                indices.by_imsi.remove(&imsi);
            }
        }
        if let Some(ip) = peer_ip {
            if let Some(peers) = indices.by_peer.get_mut(&ip) {
                peers.retain(|s| !Arc::ptr_eq(s, session));
                if peers.is_empty() {
                    indices.by_peer.remove(&ip);
                }
            }
        }
    }

    /// Remove and return every session for a peer (used on peer restart).
    pub fn remove_by_peer(&self, peer: IpAddr) -> Vec<Arc<Session>> {
        let sessions = self.get_by_peer(peer);
        for session in &sessions {
            self.remove(session);
        }
        sessions
    }

    /// Whether a TEID is currently in use as a local index.
    pub fn has_teid(&self, teid: u32) -> bool {
        self.read().by_teid.contains_key(&teid)
    }

    pub fn len(&self) -> usize {
        self.read().by_teid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_teid.is_empty()
    }

    /// Snapshot of the registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut out: Vec<Arc<Session>> = Vec::new();
        for session in self.read().by_teid.values() {
            if !out.iter().any(|s| Arc::ptr_eq(s, session)) {
                out.push(Arc::clone(session));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::from([127, 0, 0, last]), 2123)
    }

    fn session(peer_addr: SocketAddr, imsi: &str) -> Arc<Session> {
        let s = Arc::new(Session::with_default_bearer(peer_addr));
        s.set_imsi(imsi);
        s
    }

    #[test]
    fn test_register_and_lookup() {
        let store = SessionStore::new();
        let s = session(peer(1), "001010000000001");
        store.register(0x100, &s);

        let found = store.get_by_teid(0x100, peer(1)).unwrap();
        assert!(Arc::ptr_eq(&found, &s));

        let found = store.get_by_imsi("001010000000001").unwrap();
        assert!(Arc::ptr_eq(&found, &s));

        assert_eq!(store.get_by_peer(peer(1).ip()).len(), 1);
    }

    #[test]
    fn test_teid_lookup_checks_peer() {
        let store = SessionStore::new();
        let s = session(peer(1), "001010000000001");
        store.register(0x100, &s);

        assert!(matches!(
            store.get_by_teid(0x100, peer(2)),
            Err(GtpError::UnknownTeid { teid: 0x100, .. })
        ));
        assert!(matches!(
            store.get_by_teid(0x200, peer(1)),
            Err(GtpError::UnknownTeid { .. })
        ));
    }

    #[test]
    fn test_remove_clears_all_indices() {
        let store = SessionStore::new();
        let s = session(peer(1), "001010000000001");
        store.register(0x100, &s);
        store.register(0x101, &s);

        store.remove(&s);
        assert!(store.get_by_teid(0x100, peer(1)).is_err());
        assert!(store.get_by_teid(0x101, peer(1)).is_err());
        assert!(store.get_by_imsi("001010000000001").is_err());
        assert!(store.get_by_peer(peer(1).ip()).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_teid_reuse_after_removal() {
        let store = SessionStore::new();
        let a = session(peer(1), "001010000000001");
        store.register(0x100, &a);
        assert!(store.has_teid(0x100));

        store.remove(&a);
        assert!(!store.has_teid(0x100));

        let b = session(peer(1), "001010000000002");
        store.register(0x100, &b);
        let found = store.get_by_teid(0x100, peer(1)).unwrap();
        assert!(Arc::ptr_eq(&found, &b));
    }

    #[test]
    fn test_remove_by_peer() {
        let store = SessionStore::new();
        let a = session(peer(1), "001010000000001");
        let b = session(peer(1), "001010000000002");
        let c = session(peer(2), "001010000000003");
        store.register(1, &a);
        store.register(2, &b);
        store.register(3, &c);

        let removed = store.remove_by_peer(peer(1).ip());
        assert_eq!(removed.len(), 2);
        assert!(store.get_by_imsi("001010000000001").is_err());
        assert!(store.get_by_imsi("001010000000002").is_err());
        assert!(store.get_by_imsi("001010000000003").is_ok());
    }

    #[test]
    fn test_late_imsi_indexing() {
        let store = SessionStore::new();
        let s = Arc::new(Session::with_default_bearer(peer(1)));
        store.register(0x42, &s);
        assert!(store.get_by_imsi("001010000000009").is_err());

        s.set_imsi("001010000000009");
        store.index_by_imsi(&s);
        assert!(store.get_by_imsi("001010000000009").is_ok());
    }
}
