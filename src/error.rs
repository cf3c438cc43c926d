//! GTP error types

use std::net::SocketAddr;

use thiserror::Error;

/// Errors produced by the codec, the session registry and the UDP endpoints.
#[derive(Error, Debug)]
pub enum GtpError {
    /// Buffer ended before the advertised length
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Version bits do not match the expected protocol version
    #[error("invalid GTP version: {0}")]
    InvalidVersion(u8),

    /// Wire-format violation not covered by a more specific variant
    #[error("malformed data: {0}")]
    Malformed(String),

    /// IE payload length does not match what the IE type requires
    #[error("invalid IE length for type {ie_type}: expected {expected}, got {actual}")]
    InvalidIeLength {
        ie_type: u8,
        expected: usize,
        actual: usize,
    },

    /// Typed accessor invoked on an IE of a different type
    #[error("wrong IE type: wanted {wanted}, got {got}")]
    WrongIeType { wanted: u8, got: u8 },

    /// A handler or procedure consulted an IE absent from the message
    #[error("required IE missing: type {0}")]
    RequiredIeMissing(u8),

    /// Response carried a non-accepted Cause value
    #[error("non-OK cause {cause} in {msg_type}")]
    CauseNotOk { msg_type: &'static str, cause: u8 },

    /// No session registered for the IMSI
    #[error("unknown IMSI: {0}")]
    UnknownImsi(String),

    /// No session registered under the TEID for the peer
    #[error("unknown TEID {teid:#010x} for peer {peer}")]
    UnknownTeid { teid: u32, peer: SocketAddr },

    /// Session is missing a TEID for the requested interface type
    #[error("no TEID registered for interface type {0}")]
    TeidNotFound(u8),

    /// The session is not in the state the operation requires
    #[error("invalid session state, IMSI: {0}")]
    InvalidSession(String),

    /// No response arrived within the deadline
    #[error("timed out waiting for sequence {0}")]
    Timeout(u32),

    /// No handler registered for the incoming message type; non-fatal
    #[error("no handler for incoming message type {0}, ignoring")]
    HandlerNotFound(u8),

    /// The endpoint was shut down while the operation was pending
    #[error("operation cancelled")]
    Cancelled,

    /// Sequence number on the inbox did not match the awaited transaction
    #[error("unexpected sequence number {got}, awaiting {want}")]
    InvalidSequence { want: u32, got: u32 },

    /// Allocator ran out of identifiers or addresses
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Fatal socket error; terminates the receive loop
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type GtpResult<T> = Result<T, GtpError>;

impl GtpError {
    /// Whether the receive loop should terminate on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GtpError::Io(_))
    }
}
