//! GTP protocol stack
//!
//! Wire codecs for GTPv0, GTPv1 (control and user plane) and GTPv2-C, plus
//! the pieces a mobile-core gateway element needs on top of them: a UDP
//! connection endpoint multiplexing request/response transactions, a
//! per-subscriber session and bearer registry, and a GTP-U relay forwarding
//! user traffic between tunnels.
//!
//! Protocol references: 3GPP TS 29.274 (GTPv2-C), TS 29.060 (GTPv1),
//! TS 29.281 (GTP-U), GSM 09.60 (GTPv0).

pub mod conn;
pub mod error;
pub mod ippool;
pub mod metrics;
pub mod session;
pub mod store;
pub mod tbcd;
pub mod uplane;
pub mod v0;
pub mod v1;
pub mod v2;


pub use conn::{handler, Conn, ConnConfig, HandlerFunc, DEFAULT_TIMEOUT};
pub use error::{GtpError, GtpResult};
pub use session::{Bearer, Interface, QosProfile, Session};
pub use store::SessionStore;
pub use uplane::{KernelGtpDriver, KernelRole, UPlaneConn};

/// GTPv1/v2 control-plane UDP port
pub const GTPC_PORT: u16 = 2123;

/// GTP-U user-plane UDP port
pub const GTPU_PORT: u16 = 2152;

/// GTPv0 (GTP') UDP port
pub const GTPV0_PORT: u16 = 3386;
