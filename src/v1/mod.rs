//! GTPv1 (3GPP TS 29.060 / TS 29.281)
//!
//! GTPv1-C signalling messages and the GTP-U framing used by the user-plane
//! endpoint.

pub mod header;
pub mod ie;
pub mod message;
pub mod types;

pub use header::{ExtensionHeader, Header, MsgType};
pub use ie::{Ie, TlvType, TvType};
pub use message::Message;
pub use types::{cause_is_accepted, cause_is_rejected, InterfaceType};
