//! GTP-U endpoint and tunnel relay
//!
//! Encapsulates and decapsulates user traffic (G-PDUs) and forwards packets
//! between tunnels. An incoming G-PDU is resolved against the relay table
//! first (rewrite the TEID, re-emit on the paired endpoint), then the local
//! tunnel table (hand the inner payload to the registered handler), and as
//! a last resort answered with an Error Indication.
//!
//! A kernel GTP driver can be attached behind [`KernelGtpDriver`]; the
//! endpoint behaves identically without one, payloads simply stay in user
//! space.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::GtpResult;
use crate::metrics::MessageCounters;
use crate::session::Session;
use crate::v1::{Message, MsgType, TvType};
use crate::v2::TeidPool;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Role this node plays towards a kernel GTP device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelRole {
    Ggsn,
    Sgsn,
}

/// Seam for an optional kernel-offload driver (netlink GTP device or
/// similar). The crate ships no implementation; with a driver installed the
/// tunnel table is mirrored into it.
pub trait KernelGtpDriver: Send + Sync {
    fn add_tunnel(
        &self,
        peer_ip: IpAddr,
        subscriber_ip: IpAddr,
        otei: u32,
        itei: u32,
    ) -> GtpResult<()>;
    fn del_tunnel(&self, itei: u32) -> GtpResult<()>;
    fn close(&self);
}

/// Handler receiving decapsulated payloads: `(source, teid, inner packet)`.
pub type PayloadHandler = Arc<dyn Fn(SocketAddr, u32, Bytes) + Send + Sync>;

/// Hook invoked when the peer reports an unknown TEID via Error Indication:
/// `(teid, peer U-plane address)`. Tearing the session down is the
/// consumer's decision.
pub type ErrorIndicationHandler = Arc<dyn Fn(u32, IpAddr) + Send + Sync>;

#[derive(Debug, Clone)]
struct Tunnel {
    peer_ip: IpAddr,
    subscriber_ip: IpAddr,
    otei: u32,
}

#[derive(Clone)]
struct RelayRule {
    other: Arc<UPlaneConn>,
    otei: u32,
    raddr: SocketAddr,
}

/// A GTP-U endpoint bound to one local address.
pub struct UPlaneConn {
    socket: UdpSocket,
    local_addr: SocketAddr,
    restart_counter: u8,
    shutting_down: AtomicBool,
    tunnels: RwLock<HashMap<u32, Tunnel>>,
    relays: RwLock<HashMap<u32, RelayRule>>,
    payload_handler: RwLock<Option<PayloadHandler>>,
    error_indication_handler: RwLock<Option<ErrorIndicationHandler>>,
    kernel: RwLock<Option<(Box<dyn KernelGtpDriver>, KernelRole)>>,
    teid_pool: TeidPool,
    counters: MessageCounters,
}

impl UPlaneConn {
    pub async fn bind(local_addr: SocketAddr) -> GtpResult<Arc<Self>> {
        Self::bind_with_restart_counter(local_addr, 0).await
    }

    pub async fn bind_with_restart_counter(
        local_addr: SocketAddr,
        restart_counter: u8,
    ) -> GtpResult<Arc<Self>> {
        let socket = UdpSocket::bind(local_addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Arc::new(Self {
            socket,
            local_addr,
            restart_counter,
            shutting_down: AtomicBool::new(false),
            tunnels: RwLock::new(HashMap::new()),
            relays: RwLock::new(HashMap::new()),
            payload_handler: RwLock::new(None),
            error_indication_handler: RwLock::new(None),
            kernel: RwLock::new(None),
            teid_pool: TeidPool::new(),
            counters: MessageCounters::new(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn counters(&self) -> &MessageCounters {
        &self.counters
    }

    /// Allocate a local U-plane TEID for a new tunnel endpoint.
    pub fn allocate_teid(&self) -> u32 {
        loop {
            let teid = self.teid_pool.allocate();
            if !self.tunnels.read().expect("tunnel lock poisoned").contains_key(&teid)
                && !self.relays.read().expect("relay lock poisoned").contains_key(&teid)
            {
                return teid;
            }
        }
    }

    /// Install the handler receiving decapsulated G-PDU payloads.
    pub fn set_payload_handler(&self, handler: PayloadHandler) {
        *self.payload_handler.write().expect("handler lock poisoned") = Some(handler);
    }

    /// Install the Error Indication hook.
    pub fn set_error_indication_handler(&self, handler: ErrorIndicationHandler) {
        *self
            .error_indication_handler
            .write()
            .expect("handler lock poisoned") = Some(handler);
    }

    /// Attach a kernel GTP driver; the current tunnel table is mirrored
    /// into it.
    pub fn enable_kernel(
        &self,
        driver: Box<dyn KernelGtpDriver>,
        role: KernelRole,
    ) -> GtpResult<()> {
        for (itei, tunnel) in self.tunnels.read().expect("tunnel lock poisoned").iter() {
            driver.add_tunnel(tunnel.peer_ip, tunnel.subscriber_ip, tunnel.otei, *itei)?;
        }
        *self.kernel.write().expect("kernel lock poisoned") = Some((driver, role));
        log::info!("kernel GTP driver enabled ({role:?}) on {}", self.local_addr);
        Ok(())
    }

    /// Register a tunnel, replacing any previous entry for `itei`.
    pub fn add_tunnel(
        &self,
        peer_ip: IpAddr,
        subscriber_ip: IpAddr,
        otei: u32,
        itei: u32,
    ) -> GtpResult<()> {
        if let Some((driver, _)) = self.kernel.read().expect("kernel lock poisoned").as_ref() {
            driver.add_tunnel(peer_ip, subscriber_ip, otei, itei)?;
        }
        self.tunnels.write().expect("tunnel lock poisoned").insert(
            itei,
            Tunnel {
                peer_ip,
                subscriber_ip,
                otei,
            },
        );
        log::debug!(
            "tunnel on {}: itei={itei:#x} otei={otei:#x} peer={peer_ip} ue={subscriber_ip}",
            self.local_addr
        );
        Ok(())
    }

    /// Register a tunnel after explicitly dropping any conflicting entry,
    /// kernel state included.
    pub fn add_tunnel_override(
        &self,
        peer_ip: IpAddr,
        subscriber_ip: IpAddr,
        otei: u32,
        itei: u32,
    ) -> GtpResult<()> {
        self.remove_tunnel(itei)?;
        self.add_tunnel(peer_ip, subscriber_ip, otei, itei)
    }

    pub fn remove_tunnel(&self, itei: u32) -> GtpResult<()> {
        let removed = self
            .tunnels
            .write()
            .expect("tunnel lock poisoned")
            .remove(&itei);
        if removed.is_some() {
            if let Some((driver, _)) = self.kernel.read().expect("kernel lock poisoned").as_ref() {
                driver.del_tunnel(itei)?;
            }
        }
        Ok(())
    }

    /// Install a forwarding rule: a G-PDU arriving here with TEID `itei` is
    /// re-emitted on `other` with TEID `otei` towards `raddr`.
    pub fn relay_to(
        &self,
        other: &Arc<UPlaneConn>,
        itei: u32,
        otei: u32,
        raddr: SocketAddr,
    ) -> GtpResult<()> {
        self.relays.write().expect("relay lock poisoned").insert(
            itei,
            RelayRule {
                other: Arc::clone(other),
                otei,
                raddr,
            },
        );
        log::debug!(
            "relay on {}: itei={itei:#x} -> {} otei={otei:#x} raddr={raddr}",
            self.local_addr,
            other.local_addr()
        );
        Ok(())
    }

    pub fn remove_relay(&self, itei: u32) {
        self.relays.write().expect("relay lock poisoned").remove(&itei);
    }

    /// Encapsulate `payload` with the session's outgoing TEID and send it
    /// to the session's U-plane peer.
    pub async fn write_to_session(&self, session: &Session, payload: Bytes) -> GtpResult<()> {
        let teid = session.outgoing_teid()?;
        let raddr = session.remote_address()?;
        self.send_message(raddr, &Message::gpdu(teid, payload)).await
    }

    /// Stop the receive loop and drop the relay table (which holds
    /// references to paired endpoints).
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.relays.write().expect("relay lock poisoned").clear();
        if let Some((driver, _)) = self.kernel.write().expect("kernel lock poisoned").take() {
            driver.close();
        }
    }

    async fn send_message(&self, peer: SocketAddr, msg: &Message) -> GtpResult<()> {
        self.socket.send_to(&msg.encode(), peer).await?;
        self.counters.inc_sent(peer, msg.msg_type());
        Ok(())
    }

    /// Drive the receive loop until [`UPlaneConn::shutdown`] or a fatal
    /// socket error.
    pub async fn listen_and_serve(self: Arc<Self>) -> GtpResult<()> {
        let mut buf = vec![0u8; 65536];
        log::info!("serving GTP-U on {}", self.local_addr);

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let (len, peer) = match timeout(POLL_INTERVAL, self.socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    log::error!("socket error on {}: {e}", self.local_addr);
                    return Err(e.into());
                }
                Ok(Ok(received)) => received,
            };

            let mut bytes = Bytes::copy_from_slice(&buf[..len]);
            let msg = match Message::decode(&mut bytes) {
                Ok(msg) => msg,
                Err(e) => {
                    log::warn!("dropping malformed GTP-U datagram from {peer}: {e}");
                    continue;
                }
            };
            self.counters.inc_received(peer, msg.msg_type());

            if let Err(e) = self.handle_message(peer, msg).await {
                log::error!("error handling GTP-U message from {peer}: {e}");
            }
        }

        log::info!("GTP-U endpoint on {} shut down", self.local_addr);
        Ok(())
    }

    async fn handle_message(&self, peer: SocketAddr, msg: Message) -> GtpResult<()> {
        match MsgType::from_u8(msg.msg_type()) {
            Some(MsgType::EchoRequest) => {
                let seq = msg.sequence().unwrap_or(0);
                self.send_message(peer, &Message::echo_response(seq, self.restart_counter))
                    .await
            }
            Some(MsgType::EchoResponse) => Ok(()),
            Some(MsgType::ErrorIndication) => {
                self.handle_error_indication(peer, &msg);
                Ok(())
            }
            Some(MsgType::EndMarker) => {
                log::debug!("end marker for TEID {:#x} from {peer}", msg.teid());
                Ok(())
            }
            Some(MsgType::GPdu) => self.handle_gpdu(peer, msg).await,
            _ => {
                log::warn!(
                    "unexpected {} on U-plane from {peer}, ignoring",
                    msg.type_name()
                );
                Ok(())
            }
        }
    }

    fn handle_error_indication(&self, peer: SocketAddr, msg: &Message) {
        let teid = msg
            .get_ie(TvType::TeidDataI as u8)
            .and_then(|ie| ie.as_teid().ok());
        let Some(teid) = teid else {
            log::warn!("error indication without TEID Data I from {peer}");
            return;
        };

        log::warn!("peer {peer} does not recognise TEID {teid:#x}");
        let hook = self
            .error_indication_handler
            .read()
            .expect("handler lock poisoned")
            .clone();
        if let Some(hook) = hook {
            hook(teid, peer.ip());
        }
    }

    async fn handle_gpdu(&self, peer: SocketAddr, msg: Message) -> GtpResult<()> {
        let teid = msg.teid();
        let payload = msg.payload.clone().unwrap_or_default();

        // forwarding rule first: rewrite the TEID and re-emit
        let rule = self
            .relays
            .read()
            .expect("relay lock poisoned")
            .get(&teid)
            .cloned();
        if let Some(rule) = rule {
            return rule
                .other
                .send_message(rule.raddr, &Message::gpdu(rule.otei, payload))
                .await;
        }

        // locally terminated tunnel: hand the inner packet up
        let known = self
            .tunnels
            .read()
            .expect("tunnel lock poisoned")
            .contains_key(&teid);
        if known {
            let handler = self
                .payload_handler
                .read()
                .expect("handler lock poisoned")
                .clone();
            match handler {
                Some(handler) => handler(peer, teid, payload),
                None => log::debug!("no payload handler, dropping G-PDU for TEID {teid:#x}"),
            }
            return Ok(());
        }

        // unknown tunnel: tell the sender
        log::warn!("G-PDU for unknown TEID {teid:#x} from {peer}");
        self.send_message(peer, &Message::error_indication(teid, self.local_addr.ip()))
            .await
    }
}
