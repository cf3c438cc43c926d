//! End-to-end endpoint tests over loopback sockets: the attach handshake,
//! echo path management, peer restart and user-plane relaying.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use gtpstack::conn::{handler, Conn, HandlerFunc};
use gtpstack::session::Session;
use gtpstack::uplane::UPlaneConn;
use gtpstack::v2::types::{rat_type, Cause, FTeid, InterfaceType};
use gtpstack::v2::{Ie, IeType, Message, MsgType};
use gtpstack::{GtpError, GtpResult, DEFAULT_TIMEOUT};

const IMSI: &str = "001010123456789";

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn spawn_conn(interface_type: InterfaceType, restart_counter: u8) -> Arc<Conn> {
    let conn = Conn::bind(loopback(), interface_type, restart_counter)
        .await
        .unwrap();
    let serving = Arc::clone(&conn);
    tokio::spawn(async move { serving.listen_and_serve().await });
    conn
}

/// Handlers making a connection behave like the session-accepting side of
/// an S11 interface: every Create Session / Modify Bearer / Delete Session
/// request is answered with success.
fn sgw_handlers(ue_ip: Ipv4Addr) -> HashMap<u8, HandlerFunc> {
    let mut handlers: HashMap<u8, HandlerFunc> = HashMap::new();

    handlers.insert(
        MsgType::CreateSessionRequest as u8,
        handler(move |conn, peer, msg| async move {
            let imsi = msg.require_ie(IeType::Imsi, 0)?.as_imsi()?;

            let session = Arc::new(Session::with_default_bearer(peer));
            session.set_imsi(&imsi);

            let mme_fteid = msg.require_ie(IeType::FTeid, 0)?.as_fteid()?;
            session.add_teid(InterfaceType::S11MmeGtpC, mme_fteid.teid);

            let sender_fteid = conn.new_sender_fteid();
            let local_teid = sender_fteid.as_teid()?;
            session.add_teid(InterfaceType::S11S4SgwGtpC, local_teid);
            conn.sessions().register(local_teid, &session);

            let response = Message::create_session_response(
                mme_fteid.teid,
                0,
                vec![
                    Ie::cause(Cause::RequestAccepted as u8),
                    sender_fteid,
                    Ie::paa_v4(ue_ip),
                    Ie::bearer_context(&[
                        Ie::cause(Cause::RequestAccepted as u8),
                        Ie::ebi(5),
                        Ie::fteid(&FTeid::new(
                            InterfaceType::S1uSgwGtpU,
                            0x5001,
                            conn.local_addr().ip(),
                        )),
                    ]),
                ],
            );
            conn.respond_to(peer, &msg, response).await
        }),
    );

    handlers.insert(
        MsgType::ModifyBearerRequest as u8,
        handler(|conn, peer, msg| async move {
            let session = conn.sessions().get_by_teid(msg.teid(), peer)?;
            let mme_teid = session.teid(InterfaceType::S11MmeGtpC)?;
            let response = Message::modify_bearer_response(
                mme_teid,
                0,
                vec![
                    Ie::cause(Cause::RequestAccepted as u8),
                    Ie::bearer_context(&[Ie::cause(Cause::RequestAccepted as u8), Ie::ebi(5)]),
                ],
            );
            conn.respond_to(peer, &msg, response).await
        }),
    );

    handlers.insert(
        MsgType::DeleteSessionRequest as u8,
        handler(|conn, peer, msg| async move {
            let session = conn.sessions().get_by_teid(msg.teid(), peer)?;
            let mme_teid = session.teid(InterfaceType::S11MmeGtpC)?;
            conn.sessions().remove(&session);
            let response = Message::delete_session_response(
                mme_teid,
                0,
                vec![Ie::cause(Cause::RequestAccepted as u8)],
            );
            conn.respond_to(peer, &msg, response).await
        }),
    );

    handlers
}

fn attach_ies(conn: &Conn) -> GtpResult<Vec<Ie>> {
    Ok(vec![
        Ie::imsi(IMSI)?,
        Ie::msisdn("819012345678")?,
        Ie::mei("1234567890123456")?,
        Ie::serving_network("001", "01")?,
        Ie::rat_type(rat_type::EUTRAN),
        Ie::apn("internet"),
        Ie::selection_mode(0),
        Ie::pdn_type(1),
        Ie::apn_restriction(0),
        Ie::ambr(0, 0),
        conn.new_sender_fteid(),
        Ie::bearer_context(&[Ie::ebi(5), Ie::bearer_qos(&Default::default())]),
    ])
}

#[tokio::test]
async fn attach_happy_path() {
    let mme = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    let sgw = spawn_conn(InterfaceType::S11S4SgwGtpC, 1).await;
    sgw.add_handlers(sgw_handlers(Ipv4Addr::new(100, 64, 0, 1)));

    // Create Session
    let (session, seq) = mme
        .create_session(sgw.local_addr(), attach_ies(&mme).unwrap())
        .await
        .unwrap();
    let response = mme.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(response.msg_type(), MsgType::CreateSessionResponse as u8);

    let sgw_fteid = response.require_ie(IeType::FTeid, 0).unwrap().as_fteid().unwrap();
    session.add_teid(InterfaceType::S11S4SgwGtpC, sgw_fteid.teid);
    session.set_ue_ip(response.require_ie(IeType::Paa, 0).unwrap().as_paa().unwrap());

    let bearer_ctx = response.require_ie(IeType::BearerContext, 0).unwrap();
    let ebi = bearer_ctx.child(IeType::Ebi as u8, 0).unwrap().as_ebi().unwrap();
    let s1u = bearer_ctx
        .child(IeType::FTeid as u8, 0)
        .unwrap()
        .as_fteid()
        .unwrap();
    session.set_outgoing_teid(s1u.teid);
    session.activate().unwrap();

    // Modify Bearer
    let sgw_teid = session.teid(InterfaceType::S11S4SgwGtpC).unwrap();
    let seq = mme
        .modify_bearer(
            sgw_teid,
            &session,
            vec![Ie::bearer_context(&[
                Ie::ebi(ebi),
                Ie::fteid(&FTeid::new(
                    InterfaceType::S1uEnodebGtpU,
                    0xe001,
                    IpAddr::V4(Ipv4Addr::LOCALHOST),
                )),
            ])],
        )
        .await
        .unwrap();
    let response = mme.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(response.msg_type(), MsgType::ModifyBearerResponse as u8);

    // the session is addressable under both control-plane TEIDs, active,
    // with a live default bearer
    assert!(session.teid(InterfaceType::S11MmeGtpC).is_ok());
    assert!(session.teid(InterfaceType::S11S4SgwGtpC).is_ok());
    assert!(session.is_active());
    let bearer = session.default_bearer().unwrap();
    assert_ne!(bearer.ebi, 0);
    assert_eq!(session.ue_ip(), Some(IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1))));

    // the MME store finds the session by IMSI and by its local TEID
    assert!(mme.sessions().get_by_imsi(IMSI).is_ok());
    let local_teid = session.teid(InterfaceType::S11MmeGtpC).unwrap();
    assert!(mme
        .sessions()
        .get_by_teid(local_teid, sgw.local_addr())
        .is_ok());

    // Delete Session: the store entry survives until the caller confirms
    let seq = mme.delete_session(sgw_teid, &session, Vec::new()).await.unwrap();
    let response = mme.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(response.msg_type(), MsgType::DeleteSessionResponse as u8);
    assert!(mme.sessions().get_by_imsi(IMSI).is_ok());
    mme.sessions().remove(&session);
    assert!(mme.sessions().get_by_imsi(IMSI).is_err());

    mme.shutdown();
    sgw.shutdown();
}

#[tokio::test]
async fn echo_carries_restart_counter() {
    let a = spawn_conn(InterfaceType::S11MmeGtpC, 3).await;
    let b = spawn_conn(InterfaceType::S11S4SgwGtpC, 7).await;

    let seq = a.echo(b.local_addr()).await.unwrap();
    let response = a.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap();

    assert_eq!(response.msg_type(), MsgType::EchoResponse as u8);
    assert_eq!(response.sequence(), seq);
    let recovery = response
        .get_ie_by_type(IeType::Recovery as u8)
        .unwrap()
        .as_recovery()
        .unwrap();
    assert_eq!(recovery, 7);

    // the peer's restart counter became observable
    assert_eq!(a.peer_restart_counter(b.local_addr().ip()), Some(7));

    // counters track one emission and one successful parse
    assert_eq!(a.counters().sent(b.local_addr(), MsgType::EchoRequest as u8), 1);
    assert_eq!(
        a.counters().received(b.local_addr(), MsgType::EchoResponse as u8),
        1
    );

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn unhandled_message_type_is_not_fatal() {
    let a = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    let b = spawn_conn(InterfaceType::S11S4SgwGtpC, 1).await;

    // nobody handles a Delete Bearer Request on b
    a.send_message_to(
        b.local_addr(),
        Message::delete_bearer_request(0, 0, vec![Ie::ebi(5)]),
    )
    .await
    .unwrap();

    // the endpoint keeps serving
    let seq = a.echo(b.local_addr()).await.unwrap();
    assert!(a.wait_message(seq, DEFAULT_TIMEOUT).await.is_ok());

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn wait_message_times_out() {
    let conn = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    // a socket that never answers
    let silent = UdpSocket::bind(loopback()).await.unwrap();

    let seq = conn.echo(silent.local_addr().unwrap()).await.unwrap();
    let err = conn
        .wait_message(seq, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, GtpError::Timeout(s) if s == seq));

    conn.shutdown();
}

#[tokio::test]
async fn shutdown_cancels_pending_waiters() {
    let conn = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    let silent = UdpSocket::bind(loopback()).await.unwrap();

    let seq = conn.echo(silent.local_addr().unwrap()).await.unwrap();
    conn.shutdown();

    let err = conn.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap_err();
    assert!(matches!(err, GtpError::Cancelled));
}

#[tokio::test]
async fn rejecting_cause_surfaces_to_waiter() {
    let mme = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    let sgw = spawn_conn(InterfaceType::S11S4SgwGtpC, 1).await;

    sgw.add_handler(
        MsgType::CreateSessionRequest as u8,
        handler(|conn, peer, msg| async move {
            let response = Message::create_session_response(
                0,
                0,
                vec![Ie::cause(Cause::ContextNotFound as u8)],
            );
            conn.respond_to(peer, &msg, response).await
        }),
    );

    let (session, seq) = mme
        .create_session(sgw.local_addr(), attach_ies(&mme).unwrap())
        .await
        .unwrap();
    let err = mme.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap_err();
    assert!(matches!(err, GtpError::CauseNotOk { cause: 64, .. }));

    mme.sessions().remove(&session);
    mme.shutdown();
    sgw.shutdown();
}

#[tokio::test]
async fn strict_validation_rejects_missing_cause() {
    let mme = Conn::bind_with_config(
        loopback(),
        InterfaceType::S11MmeGtpC,
        1,
        gtpstack::ConnConfig {
            strict_ie_validation: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let serving = Arc::clone(&mme);
    tokio::spawn(async move { serving.listen_and_serve().await });

    let sgw = spawn_conn(InterfaceType::S11S4SgwGtpC, 1).await;
    sgw.add_handler(
        MsgType::CreateSessionRequest as u8,
        handler(|conn, peer, msg| async move {
            // answer without the mandatory Cause IE
            conn.respond_to(peer, &msg, Message::create_session_response(0, 0, Vec::new()))
                .await
        }),
    );

    let (session, seq) = mme
        .create_session(sgw.local_addr(), attach_ies(&mme).unwrap())
        .await
        .unwrap();
    let err = mme.wait_message(seq, DEFAULT_TIMEOUT).await.unwrap_err();
    assert!(matches!(err, GtpError::RequiredIeMissing(2)));

    // the default lenient endpoint tolerates the same response
    let lenient = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    let (session2, seq) = lenient
        .create_session(sgw.local_addr(), attach_ies(&lenient).unwrap())
        .await
        .unwrap();
    assert!(lenient.wait_message(seq, DEFAULT_TIMEOUT).await.is_ok());

    mme.sessions().remove(&session);
    lenient.sessions().remove(&session2);
    mme.shutdown();
    sgw.shutdown();
    lenient.shutdown();
}

#[tokio::test]
async fn peer_restart_purges_sessions() {
    let mme = spawn_conn(InterfaceType::S11MmeGtpC, 1).await;
    let peer: SocketAddr = "127.0.0.9:2123".parse().unwrap();

    let session = Arc::new(Session::with_default_bearer(peer));
    session.set_imsi(IMSI);
    mme.sessions().register(0x100, &session);

    // first observation is just recorded
    mme.observe_restart_counter(peer, 1);
    assert!(mme.sessions().get_by_imsi(IMSI).is_ok());
    assert_eq!(mme.peer_restart_counter(peer.ip()), Some(1));

    // a higher counter means the peer restarted
    mme.observe_restart_counter(peer, 2);
    assert!(mme.sessions().get_by_imsi(IMSI).is_err());
    assert!(mme.sessions().get_by_teid(0x100, peer).is_err());
    assert_eq!(mme.peer_restart_counter(peer.ip()), Some(2));

    mme.shutdown();
}

#[tokio::test]
async fn cross_connection_message_passing() {
    let s11 = spawn_conn(InterfaceType::S11S4SgwGtpC, 1).await;
    let peer: SocketAddr = "127.0.0.9:2123".parse().unwrap();

    let session = Arc::new(Session::with_default_bearer(peer));
    session.set_imsi(IMSI);
    s11.sessions().register(0x42, &session);

    // a response that arrived on another endpoint reaches the session by
    // IMSI lookup and lands in its inbox
    let found = s11.sessions().get_by_imsi(IMSI).unwrap();
    let response = Message::create_session_response(0x42, 9, vec![Ie::cause(16)]);
    s11.pass_message_to(&found, response, DEFAULT_TIMEOUT)
        .await
        .unwrap();

    let delivered = session.wait_message(9, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(delivered.sequence(), 9);

    s11.shutdown();
}

mod uplane_tests {
    use super::*;
    use gtpstack::v1;

    async fn recv_message(socket: &UdpSocket) -> v1::Message {
        let mut buf = vec![0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("no datagram within deadline")
            .unwrap();
        v1::Message::decode(&mut Bytes::copy_from_slice(&buf[..len])).unwrap()
    }

    #[tokio::test]
    async fn relay_rewrites_teid_and_forwards() {
        let left = UPlaneConn::bind(loopback()).await.unwrap();
        let right = UPlaneConn::bind(loopback()).await.unwrap();

        let serving = Arc::clone(&left);
        tokio::spawn(async move { serving.listen_and_serve().await });

        let pgw = UdpSocket::bind(loopback()).await.unwrap();
        left.relay_to(&right, 1000, 2000, pgw.local_addr().unwrap())
            .unwrap();

        let enb = UdpSocket::bind(loopback()).await.unwrap();
        let payload = Bytes::from_static(b"inner ip packet bytes");
        enb.send_to(
            &v1::Message::gpdu(1000, payload.clone()).encode(),
            left.local_addr(),
        )
        .await
        .unwrap();

        let forwarded = recv_message(&pgw).await;
        assert_eq!(forwarded.msg_type(), v1::MsgType::GPdu as u8);
        assert_eq!(forwarded.teid(), 2000);
        assert_eq!(forwarded.payload, Some(payload));

        left.shutdown();
        right.shutdown();
    }

    #[tokio::test]
    async fn unknown_teid_triggers_error_indication() {
        let uconn = UPlaneConn::bind(loopback()).await.unwrap();
        let serving = Arc::clone(&uconn);
        tokio::spawn(async move { serving.listen_and_serve().await });

        let enb = UdpSocket::bind(loopback()).await.unwrap();
        enb.send_to(
            &v1::Message::gpdu(0x9999, Bytes::from_static(b"x")).encode(),
            uconn.local_addr(),
        )
        .await
        .unwrap();

        let indication = recv_message(&enb).await;
        assert_eq!(indication.msg_type(), v1::MsgType::ErrorIndication as u8);
        assert_eq!(
            indication
                .require_tv(v1::TvType::TeidDataI)
                .unwrap()
                .as_teid()
                .unwrap(),
            0x9999
        );

        uconn.shutdown();
    }

    #[tokio::test]
    async fn tunnel_payload_reaches_handler() {
        let uconn = UPlaneConn::bind(loopback()).await.unwrap();
        let serving = Arc::clone(&uconn);
        tokio::spawn(async move { serving.listen_and_serve().await });

        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        uconn.set_payload_handler(Arc::new(move |_peer, teid, payload| {
            let _ = tx.try_send((teid, payload));
        }));

        let enb = UdpSocket::bind(loopback()).await.unwrap();
        uconn
            .add_tunnel(
                enb.local_addr().unwrap().ip(),
                IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1)),
                0x2000,
                0x1000,
            )
            .unwrap();

        let payload = Bytes::from_static(b"uplink packet");
        enb.send_to(
            &v1::Message::gpdu(0x1000, payload.clone()).encode(),
            uconn.local_addr(),
        )
        .await
        .unwrap();

        let (teid, delivered) = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(teid, 0x1000);
        assert_eq!(delivered, payload);

        uconn.shutdown();
    }

    #[tokio::test]
    async fn write_to_session_encapsulates_downlink() {
        let uconn = UPlaneConn::bind(loopback()).await.unwrap();
        let enb = UdpSocket::bind(loopback()).await.unwrap();

        let session = Session::with_default_bearer("127.0.0.9:2123".parse().unwrap());
        session.set_outgoing_teid(0xe001);
        session.set_remote_address(enb.local_addr().unwrap());

        let payload = Bytes::from_static(b"downlink packet");
        uconn.write_to_session(&session, payload.clone()).await.unwrap();

        let received = recv_message(&enb).await;
        assert_eq!(received.teid(), 0xe001);
        assert_eq!(received.payload, Some(payload));
    }

    #[tokio::test]
    async fn uplane_echo_reflects_sequence() {
        let uconn = UPlaneConn::bind_with_restart_counter(loopback(), 5)
            .await
            .unwrap();
        let serving = Arc::clone(&uconn);
        tokio::spawn(async move { serving.listen_and_serve().await });

        let peer = UdpSocket::bind(loopback()).await.unwrap();
        peer.send_to(&v1::Message::echo_request(0x77).encode(), uconn.local_addr())
            .await
            .unwrap();

        let response = recv_message(&peer).await;
        assert_eq!(response.msg_type(), v1::MsgType::EchoResponse as u8);
        assert_eq!(response.sequence(), Some(0x77));
        assert_eq!(
            response
                .require_tv(v1::TvType::Recovery)
                .unwrap()
                .as_recovery()
                .unwrap(),
            5
        );

        uconn.shutdown();
    }
}
