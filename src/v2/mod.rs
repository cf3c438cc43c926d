//! GTPv2-C (3GPP TS 29.274)

pub mod header;
pub mod ie;
pub mod message;
pub mod teid_pool;
pub mod types;

pub use header::{Header, MsgType, SEQ_MAX};
pub use ie::{Ie, IeType};
pub use message::Message;
pub use teid_pool::TeidPool;
pub use types::{cause_is_accepted, Cause, FTeid, InterfaceType};
