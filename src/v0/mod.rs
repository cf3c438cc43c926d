//! GTPv0 (GSM 09.60), the charging-era protocol on UDP 3386

pub mod header;
pub mod message;

pub use header::{Header, MsgType};
pub use message::Message;
