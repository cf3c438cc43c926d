//! GTPv2-C connection endpoint
//!
//! One UDP socket, one receive task. Incoming datagrams are parsed and
//! either settle an outstanding request/response transaction or go to the
//! handler registered for their message type. Handlers run in their own
//! task so a handler awaiting a response never stalls the socket.
//!
//! Default handlers answer Echo Requests with the local restart counter and
//! track the peer's counter; observing a higher counter means the peer
//! restarted and every session towards it is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{GtpError, GtpResult};
use crate::metrics::MessageCounters;
use crate::session::Session;
use crate::store::SessionStore;
use crate::v2::types::{cause_is_accepted, FTeid, InterfaceType};
use crate::v2::{Ie, IeType, Message, MsgType, TeidPool, SEQ_MAX};

/// Default request/response correlation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the receive loop sleeps between shutdown checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outstanding entries older than this are reclaimed on the next send.
const OUTSTANDING_MAX_AGE: Duration = Duration::from_secs(60);

/// Endpoint tuning knobs.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    /// When set, responses retrieved through [`Conn::wait_message`] must
    /// carry a Cause IE where the message type mandates one; when unset,
    /// such messages are tolerated (the looser behaviour of deployed
    /// peers).
    pub strict_ie_validation: bool,
    /// Correlation timeout used by the bundled procedures.
    pub timeout: Duration,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            strict_ie_validation: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Boxed future returned by message handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = GtpResult<()>> + Send>>;

/// A handler invoked as `(conn, sender_addr, message)`.
pub type HandlerFunc = Arc<dyn Fn(Arc<Conn>, SocketAddr, Message) -> HandlerFuture + Send + Sync>;

/// Wrap an async fn or closure into a [`HandlerFunc`].
pub fn handler<F, Fut>(f: F) -> HandlerFunc
where
    F: Fn(Arc<Conn>, SocketAddr, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GtpResult<()>> + Send + 'static,
{
    Arc::new(move |conn, addr, msg| Box::pin(f(conn, addr, msg)))
}

#[derive(Debug)]
struct Outstanding {
    peer: SocketAddr,
    msg_type: u8,
    sent_at: Instant,
    tx: Option<oneshot::Sender<Message>>,
    rx: Option<oneshot::Receiver<Message>>,
}

/// A GTPv2-C endpoint bound to one local address.
pub struct Conn {
    socket: UdpSocket,
    local_addr: SocketAddr,
    interface_type: InterfaceType,
    restart_counter: u8,
    config: ConnConfig,
    next_seq: AtomicU32,
    shutting_down: AtomicBool,
    handlers: RwLock<HashMap<u8, HandlerFunc>>,
    outstanding: Mutex<HashMap<u32, Outstanding>>,
    peer_restarts: RwLock<HashMap<IpAddr, u8>>,
    sessions: SessionStore,
    teid_pool: TeidPool,
    counters: MessageCounters,
}

impl Conn {
    /// Bind a new endpoint. `interface_type` names the role of this node's
    /// control-plane F-TEIDs (e.g. S11 MME for an MME).
    pub async fn bind(
        local_addr: SocketAddr,
        interface_type: InterfaceType,
        restart_counter: u8,
    ) -> GtpResult<Arc<Self>> {
        Self::bind_with_config(local_addr, interface_type, restart_counter, ConnConfig::default())
            .await
    }

    pub async fn bind_with_config(
        local_addr: SocketAddr,
        interface_type: InterfaceType,
        restart_counter: u8,
        config: ConnConfig,
    ) -> GtpResult<Arc<Self>> {
        let socket = UdpSocket::bind(local_addr).await?;
        let local_addr = socket.local_addr()?;

        let conn = Arc::new(Self {
            socket,
            local_addr,
            interface_type,
            restart_counter,
            config,
            next_seq: AtomicU32::new(1),
            shutting_down: AtomicBool::new(false),
            handlers: RwLock::new(HashMap::new()),
            outstanding: Mutex::new(HashMap::new()),
            peer_restarts: RwLock::new(HashMap::new()),
            sessions: SessionStore::new(),
            teid_pool: TeidPool::new(),
            counters: MessageCounters::new(),
        });

        conn.add_handler(
            MsgType::EchoRequest as u8,
            handler(|conn, peer, msg| async move { conn.handle_echo_request(peer, msg).await }),
        );
        conn.add_handler(
            MsgType::EchoResponse as u8,
            handler(|conn, peer, msg| async move { conn.handle_echo_response(peer, msg) }),
        );
        conn.add_handler(
            MsgType::VersionNotSupported as u8,
            handler(|_conn, peer, _msg| async move {
                log::warn!("peer {peer} does not support GTPv2");
                Ok(())
            }),
        );

        Ok(conn)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The restart counter advertised in Recovery IEs.
    pub fn restart_counter(&self) -> u8 {
        self.restart_counter
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn counters(&self) -> &MessageCounters {
        &self.counters
    }

    /// Last restart counter observed from a peer, if any.
    pub fn peer_restart_counter(&self, peer: IpAddr) -> Option<u8> {
        self.peer_restarts
            .read()
            .expect("restart lock poisoned")
            .get(&peer)
            .copied()
    }

    /// Install a handler for one message type, replacing any previous one.
    pub fn add_handler(&self, msg_type: u8, handler: HandlerFunc) {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .insert(msg_type, handler);
    }

    /// Install several handlers at once.
    pub fn add_handlers(&self, handlers: HashMap<u8, HandlerFunc>) {
        let mut map = self.handlers.write().expect("handler lock poisoned");
        for (msg_type, handler) in handlers {
            map.insert(msg_type, handler);
        }
    }

    /// Stop the receive loop. Pending `wait_message` calls resolve with
    /// `Cancelled`.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Drive the receive loop until [`Conn::shutdown`] or a fatal socket
    /// error. Malformed datagrams and handler failures are logged and the
    /// loop continues.
    pub async fn listen_and_serve(self: Arc<Self>) -> GtpResult<()> {
        let mut buf = vec![0u8; 65536];
        log::info!("serving GTPv2-C on {}", self.local_addr);

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            let received = match timeout(POLL_INTERVAL, self.socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    log::error!("socket error on {}: {e}", self.local_addr);
                    self.cancel_outstanding();
                    return Err(e.into());
                }
                Ok(Ok(received)) => received,
            };

            let (len, peer) = received;
            let mut bytes = Bytes::copy_from_slice(&buf[..len]);
            let msg = match Message::decode(&mut bytes) {
                Ok(msg) => msg,
                Err(GtpError::InvalidVersion(v)) => {
                    log::warn!("GTP version {v} from {peer}, answering Version Not Supported");
                    let _ = self.send_raw(peer, &Message::version_not_supported(0)).await;
                    continue;
                }
                Err(e) => {
                    log::warn!("dropping malformed datagram from {peer}: {e}");
                    continue;
                }
            };

            self.counters.inc_received(peer, msg.msg_type());
            log::debug!(
                "received {} (seq={:#x}) from {peer}",
                msg.type_name(),
                msg.sequence()
            );
            Self::dispatch(&self, peer, msg);
        }

        log::info!("GTPv2-C endpoint on {} shut down", self.local_addr);
        self.cancel_outstanding();
        Ok(())
    }

    fn dispatch(conn: &Arc<Self>, peer: SocketAddr, msg: Message) {
        // the peer's restart counter must stay observable even when the
        // message settles a transaction and never reaches a handler
        if let Some(ie) = msg.get_ie_by_type(IeType::Recovery as u8) {
            if let Ok(counter) = ie.as_recovery() {
                conn.observe_restart_counter(peer, counter);
            }
        }

        if MsgType::is_response(msg.msg_type()) && conn.settle_outstanding(peer, &msg) {
            return;
        }

        let handler = conn
            .handlers
            .read()
            .expect("handler lock poisoned")
            .get(&msg.msg_type())
            .cloned();

        match handler {
            None => log::warn!("{}", GtpError::HandlerNotFound(msg.msg_type())),
            Some(handler) => {
                let conn = Arc::clone(conn);
                tokio::spawn(async move {
                    let msg_type = msg.type_name();
                    if let Err(e) = handler(conn, peer, msg).await {
                        log::error!("handler for {msg_type} from {peer} failed: {e}");
                    }
                });
            }
        }
    }

    /// Deliver a response to the waiter registered for its sequence number.
    /// Returns false when no matching transaction is outstanding, in which
    /// case the message falls through to handler dispatch.
    fn settle_outstanding(&self, peer: SocketAddr, msg: &Message) -> bool {
        let mut outstanding = self.outstanding.lock().expect("outstanding lock poisoned");
        let Some(entry) = outstanding.get_mut(&msg.sequence()) else {
            return false;
        };

        let expected = MsgType::response_for(entry.msg_type);
        let type_matches = expected == Some(msg.msg_type())
            || msg.msg_type() == MsgType::VersionNotSupported as u8;
        if !type_matches || entry.peer.ip() != peer.ip() {
            return false;
        }

        match entry.tx.take() {
            // send() buffers the value even when the waiter has not called
            // wait_message yet
            Some(tx) => tx.send(msg.clone()).is_ok(),
            None => {
                log::debug!(
                    "duplicate response for seq {:#x} from {peer}, ignoring",
                    msg.sequence()
                );
                true
            }
        }
    }

    fn cancel_outstanding(&self) {
        // dropping the senders resolves every pending waiter with Cancelled
        self.outstanding
            .lock()
            .expect("outstanding lock poisoned")
            .clear();
    }

    fn prune_outstanding(&self) {
        self.outstanding
            .lock()
            .expect("outstanding lock poisoned")
            .retain(|_, entry| entry.sent_at.elapsed() < OUTSTANDING_MAX_AGE);
    }

    fn allocate_sequence(&self) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) & SEQ_MAX;
            if seq != 0 {
                return seq;
            }
        }
    }

    async fn send_raw(&self, peer: SocketAddr, msg: &Message) -> GtpResult<()> {
        self.socket.send_to(&msg.encode(), peer).await?;
        self.counters.inc_sent(peer, msg.msg_type());
        log::debug!(
            "sent {} (seq={:#x}) to {peer}",
            msg.type_name(),
            msg.sequence()
        );
        Ok(())
    }

    /// Send a request with a freshly allocated sequence number and record
    /// the transaction. Returns the sequence number for `wait_message`.
    pub async fn send_message_to(&self, peer: SocketAddr, mut msg: Message) -> GtpResult<u32> {
        self.prune_outstanding();

        let seq = self.allocate_sequence();
        msg.header.sequence = seq;

        if MsgType::response_for(msg.msg_type()).is_some() {
            let (tx, rx) = oneshot::channel();
            self.outstanding
                .lock()
                .expect("outstanding lock poisoned")
                .insert(
                    seq,
                    Outstanding {
                        peer,
                        msg_type: msg.msg_type(),
                        sent_at: Instant::now(),
                        tx: Some(tx),
                        rx: Some(rx),
                    },
                );
        }

        if let Err(e) = self.send_raw(peer, &msg).await {
            self.outstanding
                .lock()
                .expect("outstanding lock poisoned")
                .remove(&seq);
            return Err(e);
        }
        Ok(seq)
    }

    /// Send `response` answering `request`: the request's sequence number is
    /// echoed into the response.
    pub async fn respond_to(
        &self,
        peer: SocketAddr,
        request: &Message,
        mut response: Message,
    ) -> GtpResult<()> {
        response.header.sequence = request.sequence();
        self.send_raw(peer, &response).await
    }

    /// Await the response for a sequence returned by `send_message_to`.
    ///
    /// Resolves with the message, `Timeout` after `wait`, `Cancelled` on
    /// endpoint shutdown, or `CauseNotOk` when the response carries a
    /// rejecting Cause value.
    pub async fn wait_message(&self, seq: u32, wait: Duration) -> GtpResult<Message> {
        let rx = {
            let mut outstanding = self.outstanding.lock().expect("outstanding lock poisoned");
            let entry = outstanding.get_mut(&seq).ok_or(GtpError::Timeout(seq))?;
            entry.rx.take().ok_or(GtpError::Timeout(seq))?
        };

        let result = timeout(wait, rx).await;
        self.outstanding
            .lock()
            .expect("outstanding lock poisoned")
            .remove(&seq);

        let msg = match result {
            Err(_) => return Err(GtpError::Timeout(seq)),
            Ok(Err(_)) => return Err(GtpError::Cancelled),
            Ok(Ok(msg)) => msg,
        };
        self.check_response(&msg)?;
        Ok(msg)
    }

    fn check_response(&self, msg: &Message) -> GtpResult<()> {
        match msg.get_ie_by_type(IeType::Cause as u8) {
            Some(ie) => {
                let cause = ie.as_cause()?;
                if !cause_is_accepted(cause) {
                    return Err(GtpError::CauseNotOk {
                        msg_type: msg.type_name(),
                        cause,
                    });
                }
            }
            None => {
                if self.config.strict_ie_validation && response_requires_cause(msg.msg_type()) {
                    return Err(GtpError::RequiredIeMissing(IeType::Cause as u8));
                }
            }
        }
        Ok(())
    }

    /// Deliver a message received on this connection to a session owned by
    /// another connection (cross-connection rendezvous: the response is
    /// matched to the session by IMSI, then handed to its inbox).
    pub async fn pass_message_to(
        &self,
        session: &Arc<Session>,
        msg: Message,
        wait: Duration,
    ) -> GtpResult<()> {
        session.push_message(msg, wait).await
    }

    /// F-TEID IE for this node's control-plane interface with a freshly
    /// allocated local TEID, collision-checked against the session store.
    pub fn new_sender_fteid(&self) -> Ie {
        let teid = self.allocate_local_teid();
        Ie::fteid(&FTeid::new(self.interface_type, teid, self.local_addr.ip()))
    }

    fn allocate_local_teid(&self) -> u32 {
        loop {
            let teid = self.teid_pool.allocate();
            if !self.sessions.has_teid(teid) {
                return teid;
            }
        }
    }

    /// Send an Echo Request; returns the sequence for `wait_message`.
    pub async fn echo(&self, peer: SocketAddr) -> GtpResult<u32> {
        self.send_message_to(peer, Message::echo_request(0)).await
    }

    async fn handle_echo_request(&self, peer: SocketAddr, msg: Message) -> GtpResult<()> {
        self.respond_to(peer, &msg, Message::echo_response(0, self.restart_counter))
            .await
    }

    // the Recovery IE was already consumed during dispatch; the handler
    // exists so unmatched Echo Responses do not log as unhandled
    fn handle_echo_response(&self, _peer: SocketAddr, msg: Message) -> GtpResult<()> {
        if self.config.strict_ie_validation
            && msg.get_ie_by_type(IeType::Recovery as u8).is_none()
        {
            return Err(GtpError::RequiredIeMissing(IeType::Recovery as u8));
        }
        Ok(())
    }

    /// Record a peer's restart counter. A counter moving forward (mod 256)
    /// means the peer restarted: every session towards it is removed.
    pub fn observe_restart_counter(&self, peer: SocketAddr, counter: u8) {
        let ip = peer.ip();
        let previous = self
            .peer_restarts
            .write()
            .expect("restart lock poisoned")
            .insert(ip, counter);

        if let Some(previous) = previous {
            let moved_forward = counter != previous && counter.wrapping_sub(previous) < 0x80;
            if moved_forward {
                let removed = self.sessions.remove_by_peer(ip);
                log::warn!(
                    "peer {ip} restarted (recovery {previous} -> {counter}), removed {} session(s)",
                    removed.len()
                );
            }
        }
    }
}

/// Response types where a Cause IE is mandatory per TS 29.274.
fn response_requires_cause(msg_type: u8) -> bool {
    use MsgType::*;
    matches!(
        MsgType::from_u8(msg_type),
        Some(
            CreateSessionResponse
                | ModifyBearerResponse
                | DeleteSessionResponse
                | CreateBearerResponse
                | UpdateBearerResponse
                | DeleteBearerResponse
                | ReleaseAccessBearersResponse
                | DownlinkDataNotificationAcknowledge
        )
    )
}

// High-level procedures: build a request from convenience arguments, wire
// the session into the store, and hand back the sequence number so the
// caller can await the response.
impl Conn {
    /// Send a Create Session Request. The session is pre-registered under
    /// the sender F-TEID's TEID; subscriber identity IEs found among `ies`
    /// are copied onto the session. When no sender F-TEID for this node's
    /// interface type is supplied, one is allocated and appended.
    pub async fn create_session(
        &self,
        peer: SocketAddr,
        mut ies: Vec<Ie>,
    ) -> GtpResult<(Arc<Session>, u32)> {
        let session = Arc::new(Session::with_default_bearer(peer));

        let mut local_teid = None;
        for ie in &ies {
            match IeType::from_u8(ie.ie_type) {
                Some(IeType::Imsi) => session.set_imsi(&ie.as_imsi()?),
                Some(IeType::Msisdn) => session.set_msisdn(&ie.as_msisdn()?),
                Some(IeType::Mei) => session.set_imei(&ie.as_mei()?),
                Some(IeType::RatType) => session.set_rat_type(ie.as_rat_type()?),
                Some(IeType::ServingNetwork) => {
                    let (mcc, mnc) = ie.as_serving_network()?;
                    session.set_serving_network(&mcc, &mnc);
                }
                Some(IeType::FTeid) if ie.instance == 0 => {
                    let fteid = ie.as_fteid()?;
                    if fteid.interface_type == self.interface_type as u8 {
                        local_teid = Some(fteid.teid);
                    }
                }
                _ => {}
            }
        }

        let local_teid = match local_teid {
            Some(teid) => teid,
            None => {
                let fteid_ie = self.new_sender_fteid();
                let teid = fteid_ie.as_teid()?;
                ies.push(fteid_ie);
                teid
            }
        };

        session.add_teid(self.interface_type, local_teid);
        self.sessions.register(local_teid, &session);

        // a first Create Session Request is addressed to TEID 0
        let msg = Message::create_session_request(0, 0, ies);
        match self.send_message_to(peer, msg).await {
            Ok(seq) => Ok((session, seq)),
            Err(e) => {
                self.sessions.remove(&session);
                Err(e)
            }
        }
    }

    /// Send a Modify Bearer Request addressed to the peer-side TEID.
    pub async fn modify_bearer(
        &self,
        teid: u32,
        session: &Arc<Session>,
        ies: Vec<Ie>,
    ) -> GtpResult<u32> {
        let peer = session
            .peer_addr()
            .ok_or_else(|| GtpError::InvalidSession(session.imsi()))?;
        self.send_message_to(peer, Message::modify_bearer_request(teid, 0, ies))
            .await
    }

    /// Send a Delete Session Request. The session stays in the store until
    /// the caller confirms the deletion succeeded.
    pub async fn delete_session(
        &self,
        teid: u32,
        session: &Arc<Session>,
        mut ies: Vec<Ie>,
    ) -> GtpResult<u32> {
        let peer = session
            .peer_addr()
            .ok_or_else(|| GtpError::InvalidSession(session.imsi()))?;
        if !ies.iter().any(|ie| ie.ie_type == IeType::Ebi as u8) {
            ies.push(Ie::ebi(session.default_bearer()?.ebi));
        }
        self.send_message_to(peer, Message::delete_session_request(teid, 0, ies))
            .await
    }

    /// Correlation timeout from the endpoint configuration.
    pub fn message_timeout(&self) -> Duration {
        self.config.timeout
    }
}
