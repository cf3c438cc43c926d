//! GTPv2-C header
//!
//! Header codec and message-type registry for GTPv2-C (3GPP TS 29.274).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};

/// Header length with TEID present (T flag set)
pub const HEADER_LEN: usize = 12;

/// Header length without TEID
pub const HEADER_LEN_NO_TEID: usize = 8;

/// Sequence numbers are 24 bits wide
pub const SEQ_MAX: u32 = 0x00FF_FFFF;

/// GTPv2-C message types (TS 29.274 Table 6.1-1, the subset this stack speaks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    EchoRequest = 1,
    EchoResponse = 2,
    VersionNotSupported = 3,
    CreateSessionRequest = 32,
    CreateSessionResponse = 33,
    ModifyBearerRequest = 34,
    ModifyBearerResponse = 35,
    DeleteSessionRequest = 36,
    DeleteSessionResponse = 37,
    ModifyBearerCommand = 64,
    ModifyBearerFailureIndication = 65,
    DeleteBearerCommand = 66,
    DeleteBearerFailureIndication = 67,
    BearerResourceCommand = 68,
    BearerResourceFailureIndication = 69,
    DownlinkDataNotificationFailureIndication = 70,
    TraceSessionActivation = 71,
    TraceSessionDeactivation = 72,
    StopPagingIndication = 73,
    CreateBearerRequest = 95,
    CreateBearerResponse = 96,
    UpdateBearerRequest = 97,
    UpdateBearerResponse = 98,
    DeleteBearerRequest = 99,
    DeleteBearerResponse = 100,
    DeletePdnConnectionSetRequest = 101,
    DeletePdnConnectionSetResponse = 102,
    ReleaseAccessBearersRequest = 170,
    ReleaseAccessBearersResponse = 171,
    DownlinkDataNotification = 176,
    DownlinkDataNotificationAcknowledge = 177,
    PgwRestartNotification = 179,
    PgwRestartNotificationAcknowledge = 180,
    UpdatePdnConnectionSetRequest = 200,
    UpdatePdnConnectionSetResponse = 201,
    ModifyAccessBearersRequest = 211,
    ModifyAccessBearersResponse = 212,
}

impl MsgType {
    /// Known message type for a wire value, `None` for unregistered types.
    pub fn from_u8(value: u8) -> Option<Self> {
        use MsgType::*;
        Some(match value {
            1 => EchoRequest,
            2 => EchoResponse,
            3 => VersionNotSupported,
            32 => CreateSessionRequest,
            33 => CreateSessionResponse,
            34 => ModifyBearerRequest,
            35 => ModifyBearerResponse,
            36 => DeleteSessionRequest,
            37 => DeleteSessionResponse,
            64 => ModifyBearerCommand,
            65 => ModifyBearerFailureIndication,
            66 => DeleteBearerCommand,
            67 => DeleteBearerFailureIndication,
            68 => BearerResourceCommand,
            69 => BearerResourceFailureIndication,
            70 => DownlinkDataNotificationFailureIndication,
            71 => TraceSessionActivation,
            72 => TraceSessionDeactivation,
            73 => StopPagingIndication,
            95 => CreateBearerRequest,
            96 => CreateBearerResponse,
            97 => UpdateBearerRequest,
            98 => UpdateBearerResponse,
            99 => DeleteBearerRequest,
            100 => DeleteBearerResponse,
            101 => DeletePdnConnectionSetRequest,
            102 => DeletePdnConnectionSetResponse,
            170 => ReleaseAccessBearersRequest,
            171 => ReleaseAccessBearersResponse,
            176 => DownlinkDataNotification,
            177 => DownlinkDataNotificationAcknowledge,
            179 => PgwRestartNotification,
            180 => PgwRestartNotificationAcknowledge,
            200 => UpdatePdnConnectionSetRequest,
            201 => UpdatePdnConnectionSetResponse,
            211 => ModifyAccessBearersRequest,
            212 => ModifyAccessBearersResponse,
            _ => return None,
        })
    }

    /// Human-readable name, used in logs and error reports.
    pub fn name(value: u8) -> &'static str {
        match Self::from_u8(value) {
            Some(t) => t.static_name(),
            None => "Unknown",
        }
    }

    fn static_name(self) -> &'static str {
        use MsgType::*;
        match self {
            EchoRequest => "Echo Request",
            EchoResponse => "Echo Response",
            VersionNotSupported => "Version Not Supported Indication",
            CreateSessionRequest => "Create Session Request",
            CreateSessionResponse => "Create Session Response",
            ModifyBearerRequest => "Modify Bearer Request",
            ModifyBearerResponse => "Modify Bearer Response",
            DeleteSessionRequest => "Delete Session Request",
            DeleteSessionResponse => "Delete Session Response",
            ModifyBearerCommand => "Modify Bearer Command",
            ModifyBearerFailureIndication => "Modify Bearer Failure Indication",
            DeleteBearerCommand => "Delete Bearer Command",
            DeleteBearerFailureIndication => "Delete Bearer Failure Indication",
            BearerResourceCommand => "Bearer Resource Command",
            BearerResourceFailureIndication => "Bearer Resource Failure Indication",
            DownlinkDataNotificationFailureIndication => {
                "Downlink Data Notification Failure Indication"
            }
            TraceSessionActivation => "Trace Session Activation",
            TraceSessionDeactivation => "Trace Session Deactivation",
            StopPagingIndication => "Stop Paging Indication",
            CreateBearerRequest => "Create Bearer Request",
            CreateBearerResponse => "Create Bearer Response",
            UpdateBearerRequest => "Update Bearer Request",
            UpdateBearerResponse => "Update Bearer Response",
            DeleteBearerRequest => "Delete Bearer Request",
            DeleteBearerResponse => "Delete Bearer Response",
            DeletePdnConnectionSetRequest => "Delete PDN Connection Set Request",
            DeletePdnConnectionSetResponse => "Delete PDN Connection Set Response",
            ReleaseAccessBearersRequest => "Release Access Bearers Request",
            ReleaseAccessBearersResponse => "Release Access Bearers Response",
            DownlinkDataNotification => "Downlink Data Notification",
            DownlinkDataNotificationAcknowledge => "Downlink Data Notification Acknowledge",
            PgwRestartNotification => "PGW Restart Notification",
            PgwRestartNotificationAcknowledge => "PGW Restart Notification Acknowledge",
            UpdatePdnConnectionSetRequest => "Update PDN Connection Set Request",
            UpdatePdnConnectionSetResponse => "Update PDN Connection Set Response",
            ModifyAccessBearersRequest => "Modify Access Bearers Request",
            ModifyAccessBearersResponse => "Modify Access Bearers Response",
        }
    }

    /// The response type answering a request type, `None` when the type is
    /// not a request or has no paired response.
    pub fn response_for(request: u8) -> Option<u8> {
        use MsgType::*;
        let rsp = match Self::from_u8(request)? {
            EchoRequest => EchoResponse,
            CreateSessionRequest => CreateSessionResponse,
            ModifyBearerRequest => ModifyBearerResponse,
            DeleteSessionRequest => DeleteSessionResponse,
            ModifyBearerCommand => ModifyBearerFailureIndication,
            DeleteBearerCommand => DeleteBearerFailureIndication,
            BearerResourceCommand => BearerResourceFailureIndication,
            CreateBearerRequest => CreateBearerResponse,
            UpdateBearerRequest => UpdateBearerResponse,
            DeleteBearerRequest => DeleteBearerResponse,
            DeletePdnConnectionSetRequest => DeletePdnConnectionSetResponse,
            ReleaseAccessBearersRequest => ReleaseAccessBearersResponse,
            DownlinkDataNotification => DownlinkDataNotificationAcknowledge,
            PgwRestartNotification => PgwRestartNotificationAcknowledge,
            UpdatePdnConnectionSetRequest => UpdatePdnConnectionSetResponse,
            ModifyAccessBearersRequest => ModifyAccessBearersResponse,
            _ => return None,
        };
        Some(rsp as u8)
    }

    /// Whether a wire value names a response (or triggered-message) type that
    /// may settle an outstanding transaction.
    pub fn is_response(value: u8) -> bool {
        use MsgType::*;
        matches!(
            Self::from_u8(value),
            Some(
                EchoResponse
                    | VersionNotSupported
                    | CreateSessionResponse
                    | ModifyBearerResponse
                    | DeleteSessionResponse
                    | ModifyBearerFailureIndication
                    | DeleteBearerFailureIndication
                    | BearerResourceFailureIndication
                    | CreateBearerResponse
                    | UpdateBearerResponse
                    | DeleteBearerResponse
                    | DeletePdnConnectionSetResponse
                    | ReleaseAccessBearersResponse
                    | DownlinkDataNotificationAcknowledge
                    | PgwRestartNotificationAcknowledge
                    | UpdatePdnConnectionSetResponse
                    | ModifyAccessBearersResponse
            )
        )
    }
}

/// GTPv2-C message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Piggybacked flag (P bit); a second message follows this one
    pub piggybacked: bool,
    /// Message type value
    pub msg_type: u8,
    /// Bytes after the length field; recomputed on encode
    pub length: u16,
    /// TEID, present when the T flag is set
    pub teid: Option<u32>,
    /// 24-bit sequence number
    pub sequence: u32,
}

impl Header {
    /// Header with TEID for session-scoped messages.
    pub fn with_teid(msg_type: u8, teid: u32, sequence: u32) -> Self {
        Self {
            piggybacked: false,
            msg_type,
            length: 0,
            teid: Some(teid),
            sequence: sequence & SEQ_MAX,
        }
    }

    /// Header without TEID (path management messages).
    pub fn without_teid(msg_type: u8, sequence: u32) -> Self {
        Self {
            piggybacked: false,
            msg_type,
            length: 0,
            teid: None,
            sequence: sequence & SEQ_MAX,
        }
    }

    /// Encoded header length in bytes.
    pub fn encoded_len(&self) -> usize {
        if self.teid.is_some() {
            HEADER_LEN
        } else {
            HEADER_LEN_NO_TEID
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 2 << 5;
        if self.piggybacked {
            flags |= 0x10;
        }
        if self.teid.is_some() {
            flags |= 0x08;
        }
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.msg_type);
        buf.put_u16(self.length);
        if let Some(teid) = self.teid {
            buf.put_u32(teid);
        }
        // 24-bit sequence followed by a spare octet
        buf.put_u32((self.sequence & SEQ_MAX) << 8);
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < 4 {
            return Err(GtpError::BufferTooShort {
                needed: 4,
                available: buf.remaining(),
            });
        }

        let flags = buf.get_u8();
        let version = flags >> 5;
        if version != 2 {
            return Err(GtpError::InvalidVersion(version));
        }
        let piggybacked = flags & 0x10 != 0;
        let has_teid = flags & 0x08 != 0;

        let msg_type = buf.get_u8();
        let length = buf.get_u16();

        let tail = if has_teid { 8 } else { 4 };
        if buf.remaining() < tail {
            return Err(GtpError::BufferTooShort {
                needed: tail,
                available: buf.remaining(),
            });
        }

        let teid = if has_teid { Some(buf.get_u32()) } else { None };
        let sequence = buf.get_u32() >> 8;

        Ok(Self {
            piggybacked,
            msg_type,
            length,
            teid,
            sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_with_teid() {
        let mut header = Header::with_teid(MsgType::CreateSessionRequest as u8, 0xdead_beef, 0x1234);
        header.length = 77;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let decoded = Header::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_roundtrip_without_teid() {
        let mut header = Header::without_teid(MsgType::EchoRequest as u8, 1);
        header.length = 4;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN_NO_TEID);

        let decoded = Header::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.teid, None);
        assert_eq!(decoded.sequence, 1);
    }

    #[test]
    fn test_rejects_wrong_version() {
        // version bits say 1
        let raw = Bytes::from_static(&[0x30, 0x01, 0x00, 0x04, 0x00, 0x00, 0x01, 0x00]);
        assert!(matches!(
            Header::decode(&mut raw.clone()),
            Err(GtpError::InvalidVersion(1))
        ));
    }

    #[test]
    fn test_sequence_masked_to_24_bits() {
        let header = Header::without_teid(MsgType::EchoRequest as u8, 0xFFFF_FFFF);
        assert_eq!(header.sequence, SEQ_MAX);
    }

    #[test]
    fn test_response_pairing() {
        assert_eq!(
            MsgType::response_for(MsgType::CreateSessionRequest as u8),
            Some(MsgType::CreateSessionResponse as u8)
        );
        assert_eq!(
            MsgType::response_for(MsgType::BearerResourceCommand as u8),
            Some(MsgType::BearerResourceFailureIndication as u8)
        );
        assert_eq!(MsgType::response_for(MsgType::EchoResponse as u8), None);
        assert!(MsgType::is_response(MsgType::DeleteSessionResponse as u8));
        assert!(!MsgType::is_response(MsgType::DeleteSessionRequest as u8));
    }
}
