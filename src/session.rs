//! Per-subscriber sessions and bearers
//!
//! A session holds the subscriber identity, the interface-qualified TEIDs
//! learned during signalling, the bearer list and an inbox through which the
//! connection delivers responses to whoever is driving the handshake.
//! Sessions are shared as `Arc<Session>`; field access goes through a lock
//! held only for the duration of the accessor.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{GtpError, GtpResult};
use crate::v2;

/// Bearer-level QoS parameters (priority level, QCI and the four bit rates).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QosProfile {
    /// ARP priority level (4 bits)
    pub pl: u8,
    /// Pre-emption capability
    pub pci: bool,
    /// Pre-emption vulnerability
    pub pvi: bool,
    /// QoS class identifier
    pub qci: u8,
    pub mbr_ul: u64,
    pub mbr_dl: u64,
    pub gbr_ul: u64,
    pub gbr_dl: u64,
}

impl QosProfile {
    /// Best-effort profile for a default bearer.
    pub fn default_bearer(qci: u8) -> Self {
        Self {
            pl: 2,
            qci,
            ..Default::default()
        }
    }
}

/// Interface-qualified TEID key. The v1 and v2 numeric spaces assign
/// different values to the same interface role, so the registry keeps them
/// as distinct tagged variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    V1(crate::v1::types::InterfaceType),
    V2(v2::types::InterfaceType),
}

impl From<crate::v1::types::InterfaceType> for Interface {
    fn from(value: crate::v1::types::InterfaceType) -> Self {
        Interface::V1(value)
    }
}

impl From<v2::types::InterfaceType> for Interface {
    fn from(value: v2::types::InterfaceType) -> Self {
        Interface::V2(value)
    }
}

impl Interface {
    fn registry_tag(&self) -> u8 {
        match self {
            Interface::V1(t) => *t as u8,
            Interface::V2(t) => *t as u8,
        }
    }

    /// Registry key carrying the version tag, so that a v1 and a v2
    /// interface with the same numeric value never collide.
    fn registry_tag_versioned(&self) -> u8 {
        match self {
            Interface::V1(t) => *t as u8,
            Interface::V2(t) => 0x80 | (*t as u8),
        }
    }
}

/// A bearer: the tunnel pair carrying one flow of subscriber traffic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bearer {
    /// EPS bearer identity (4 bits)
    pub ebi: u8,
    pub qos: QosProfile,
    /// UE address served by this bearer
    pub subscriber_ip: Option<IpAddr>,
    /// TEID the peer uses towards us
    pub incoming_teid: u32,
    /// TEID we stamp on outgoing G-PDUs
    pub outgoing_teid: u32,
    /// Peer U-plane address
    pub remote_addr: Option<SocketAddr>,
    /// Exactly one bearer per session carries this flag
    pub default: bool,
}

impl Bearer {
    pub fn new(ebi: u8, qos: QosProfile) -> Self {
        Self {
            ebi: ebi & 0x0F,
            qos,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    imsi: String,
    msisdn: String,
    imei: String,
    mcc: String,
    mnc: String,
    rat_type: u8,
    active: bool,
    ue_ip: Option<IpAddr>,
    peer: Option<SocketAddr>,
    teids: HashMap<u8, u32>,
    bearers: Vec<Bearer>,
    /// Local TEIDs this session is registered under in a store
    local_teids: Vec<u32>,
}

/// Per-subscriber state on one network function.
#[derive(Debug)]
pub struct Session {
    state: RwLock<SessionState>,
    inbox_tx: mpsc::Sender<v2::Message>,
    inbox_rx: tokio::sync::Mutex<mpsc::Receiver<v2::Message>>,
}

impl Session {
    /// Fresh session towards `peer` with a default bearer.
    pub fn new(peer: SocketAddr, default_bearer: Bearer) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(16);
        let mut bearer = default_bearer;
        bearer.default = true;
        Self {
            state: RwLock::new(SessionState {
                peer: Some(peer),
                bearers: vec![bearer],
                ..Default::default()
            }),
            inbox_tx,
            inbox_rx: tokio::sync::Mutex::new(inbox_rx),
        }
    }

    /// Session with the conventional default bearer (EBI 5, best effort).
    pub fn with_default_bearer(peer: SocketAddr) -> Self {
        Self::new(peer, Bearer::new(5, QosProfile::default_bearer(9)))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().expect("session lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().expect("session lock poisoned")
    }

    pub fn imsi(&self) -> String {
        self.read().imsi.clone()
    }

    pub fn set_imsi(&self, imsi: &str) {
        self.write().imsi = imsi.to_owned();
    }

    pub fn msisdn(&self) -> String {
        self.read().msisdn.clone()
    }

    pub fn set_msisdn(&self, msisdn: &str) {
        self.write().msisdn = msisdn.to_owned();
    }

    pub fn imei(&self) -> String {
        self.read().imei.clone()
    }

    pub fn set_imei(&self, imei: &str) {
        self.write().imei = imei.to_owned();
    }

    pub fn serving_network(&self) -> (String, String) {
        let state = self.read();
        (state.mcc.clone(), state.mnc.clone())
    }

    pub fn set_serving_network(&self, mcc: &str, mnc: &str) {
        let mut state = self.write();
        state.mcc = mcc.to_owned();
        state.mnc = mnc.to_owned();
    }

    pub fn rat_type(&self) -> u8 {
        self.read().rat_type
    }

    pub fn set_rat_type(&self, rat: u8) {
        self.write().rat_type = rat;
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.read().peer
    }

    pub fn set_peer_addr(&self, peer: SocketAddr) {
        self.write().peer = Some(peer);
    }

    pub fn ue_ip(&self) -> Option<IpAddr> {
        self.read().ue_ip
    }

    pub fn set_ue_ip(&self, ip: IpAddr) {
        let mut state = self.write();
        state.ue_ip = Some(ip);
        if let Some(bearer) = state.bearers.iter_mut().find(|b| b.default) {
            bearer.subscriber_ip = Some(ip);
        }
    }

    /// Record the TEID the peer assigned for an interface.
    pub fn add_teid(&self, interface: impl Into<Interface>, teid: u32) {
        self.write()
            .teids
            .insert(interface.into().registry_tag_versioned(), teid);
    }

    /// TEID previously learned for an interface.
    pub fn teid(&self, interface: impl Into<Interface>) -> GtpResult<u32> {
        let interface = interface.into();
        self.read()
            .teids
            .get(&interface.registry_tag_versioned())
            .copied()
            .ok_or(GtpError::TeidNotFound(interface.registry_tag()))
    }

    pub fn add_bearer(&self, bearer: Bearer) {
        let mut state = self.write();
        let mut bearer = bearer;
        bearer.default = false;
        state.bearers.push(bearer);
    }

    pub fn default_bearer(&self) -> GtpResult<Bearer> {
        self.read()
            .bearers
            .iter()
            .find(|b| b.default)
            .cloned()
            .ok_or_else(|| GtpError::InvalidSession(self.imsi()))
    }

    pub fn bearer_by_ebi(&self, ebi: u8) -> Option<Bearer> {
        self.read().bearers.iter().find(|b| b.ebi == ebi).cloned()
    }

    pub fn bearers(&self) -> Vec<Bearer> {
        self.read().bearers.clone()
    }

    /// Apply `f` to the bearer with the given EBI.
    pub fn update_bearer(&self, ebi: u8, f: impl FnOnce(&mut Bearer)) -> GtpResult<()> {
        let mut state = self.write();
        let bearer = state
            .bearers
            .iter_mut()
            .find(|b| b.ebi == ebi)
            .ok_or_else(|| GtpError::InvalidSession(String::new()))?;
        f(bearer);
        Ok(())
    }

    /// U-plane destination for [`crate::uplane::UPlaneConn::write_to_session`];
    /// lives on the default bearer.
    pub fn set_remote_address(&self, addr: SocketAddr) {
        if let Some(bearer) = self.write().bearers.iter_mut().find(|b| b.default) {
            bearer.remote_addr = Some(addr);
        }
    }

    pub fn remote_address(&self) -> GtpResult<SocketAddr> {
        self.default_bearer()?
            .remote_addr
            .ok_or_else(|| GtpError::InvalidSession(self.imsi()))
    }

    pub fn set_outgoing_teid(&self, teid: u32) {
        if let Some(bearer) = self.write().bearers.iter_mut().find(|b| b.default) {
            bearer.outgoing_teid = teid;
        }
    }

    pub fn outgoing_teid(&self) -> GtpResult<u32> {
        Ok(self.default_bearer()?.outgoing_teid)
    }

    /// Mark the attach handshake complete. Requires the subscriber identity
    /// and a default bearer to be in place.
    pub fn activate(&self) -> GtpResult<()> {
        let mut state = self.write();
        if state.imsi.is_empty() {
            return Err(GtpError::InvalidSession(String::new()));
        }
        if !state.bearers.iter().any(|b| b.default) {
            return Err(GtpError::InvalidSession(state.imsi.clone()));
        }
        state.active = true;
        Ok(())
    }

    pub fn deactivate(&self) {
        self.write().active = false;
    }

    pub fn is_active(&self) -> bool {
        self.read().active
    }

    pub(crate) fn record_local_teid(&self, teid: u32) {
        self.write().local_teids.push(teid);
    }

    pub(crate) fn local_teids(&self) -> Vec<u32> {
        self.read().local_teids.clone()
    }

    /// Deliver a response into the inbox. Fails with `Timeout` when nobody
    /// drains the inbox within `wait`.
    pub async fn push_message(&self, msg: v2::Message, wait: Duration) -> GtpResult<()> {
        let seq = msg.sequence();
        timeout(wait, self.inbox_tx.send(msg))
            .await
            .map_err(|_| GtpError::Timeout(seq))?
            .map_err(|_| GtpError::Cancelled)
    }

    /// Await the response whose sequence number is `seq`. A response with a
    /// different sequence number is a protocol violation and surfaces as
    /// `InvalidSequence`.
    pub async fn wait_message(&self, seq: u32, wait: Duration) -> GtpResult<v2::Message> {
        let mut rx = self.inbox_rx.lock().await;
        match timeout(wait, rx.recv()).await {
            Err(_) => Err(GtpError::Timeout(seq)),
            Ok(None) => Err(GtpError::Cancelled),
            Ok(Some(msg)) => {
                if msg.sequence() != seq {
                    return Err(GtpError::InvalidSequence {
                        want: seq,
                        got: msg.sequence(),
                    });
                }
                Ok(msg)
            }
        }
    }
}
