//! GTPv2-C messages
//!
//! A message is the header plus an ordered IE list. Parsing consumes exactly
//! the advertised length; trailing bytes (piggybacked message) stay in the
//! caller's buffer. Unknown message types parse into the same structure, so
//! they re-serialize unchanged.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::v2::header::{Header, MsgType};
use crate::v2::ie::{Ie, IeType};

/// A GTPv2-C message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub ies: Vec<Ie>,
}

impl Message {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            ies: Vec::new(),
        }
    }

    /// Session-scoped request or response addressed to a peer TEID.
    pub fn with_teid(msg_type: MsgType, teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self {
            header: Header::with_teid(msg_type as u8, teid, sequence),
            ies,
        }
    }

    pub fn echo_request(sequence: u32) -> Self {
        Self::new(Header::without_teid(MsgType::EchoRequest as u8, sequence))
    }

    pub fn echo_response(sequence: u32, restart_counter: u8) -> Self {
        let mut msg = Self::new(Header::without_teid(MsgType::EchoResponse as u8, sequence));
        msg.ies.push(Ie::recovery(restart_counter));
        msg
    }

    pub fn version_not_supported(sequence: u32) -> Self {
        Self::new(Header::without_teid(
            MsgType::VersionNotSupported as u8,
            sequence,
        ))
    }

    pub fn create_session_request(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::CreateSessionRequest, teid, sequence, ies)
    }

    pub fn create_session_response(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::CreateSessionResponse, teid, sequence, ies)
    }

    pub fn modify_bearer_request(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::ModifyBearerRequest, teid, sequence, ies)
    }

    pub fn modify_bearer_response(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::ModifyBearerResponse, teid, sequence, ies)
    }

    pub fn delete_session_request(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::DeleteSessionRequest, teid, sequence, ies)
    }

    pub fn delete_session_response(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::DeleteSessionResponse, teid, sequence, ies)
    }

    pub fn create_bearer_request(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::CreateBearerRequest, teid, sequence, ies)
    }

    pub fn create_bearer_response(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::CreateBearerResponse, teid, sequence, ies)
    }

    pub fn delete_bearer_request(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::DeleteBearerRequest, teid, sequence, ies)
    }

    pub fn delete_bearer_response(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::DeleteBearerResponse, teid, sequence, ies)
    }

    pub fn release_access_bearers_request(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::ReleaseAccessBearersRequest, teid, sequence, ies)
    }

    pub fn release_access_bearers_response(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::ReleaseAccessBearersResponse, teid, sequence, ies)
    }

    pub fn downlink_data_notification(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::DownlinkDataNotification, teid, sequence, ies)
    }

    pub fn downlink_data_notification_ack(teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(
            MsgType::DownlinkDataNotificationAcknowledge,
            teid,
            sequence,
            ies,
        )
    }

    pub fn pgw_restart_notification(sequence: u32, ies: Vec<Ie>) -> Self {
        Self::with_teid(MsgType::PgwRestartNotification, 0, sequence, ies)
    }

    /// Message with an unregistered type value; exists for forwarding
    /// foreign messages unchanged.
    pub fn with_teid_raw(msg_type: u8, teid: u32, sequence: u32, ies: Vec<Ie>) -> Self {
        Self {
            header: Header::with_teid(msg_type, teid, sequence),
            ies,
        }
    }

    pub fn add_ie(&mut self, ie: Ie) {
        self.ies.push(ie);
    }

    /// Lookup by (type, instance); `None` when the instance is absent.
    pub fn get_ie(&self, ie_type: u8, instance: u8) -> Option<&Ie> {
        self.ies
            .iter()
            .find(|ie| ie.ie_type == ie_type && ie.instance == instance)
    }

    /// First IE of a type regardless of instance.
    pub fn get_ie_by_type(&self, ie_type: u8) -> Option<&Ie> {
        self.ies.iter().find(|ie| ie.ie_type == ie_type)
    }

    /// Every IE of a type, in wire order.
    pub fn get_ies(&self, ie_type: u8) -> Vec<&Ie> {
        self.ies.iter().filter(|ie| ie.ie_type == ie_type).collect()
    }

    /// Lookup that treats absence as a protocol error.
    pub fn require_ie(&self, ie_type: IeType, instance: u8) -> GtpResult<&Ie> {
        self.get_ie(ie_type as u8, instance)
            .ok_or(GtpError::RequiredIeMissing(ie_type as u8))
    }

    pub fn msg_type(&self) -> u8 {
        self.header.msg_type
    }

    pub fn teid(&self) -> u32 {
        self.header.teid.unwrap_or(0)
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    /// Name for logs.
    pub fn type_name(&self) -> &'static str {
        MsgType::name(self.header.msg_type)
    }

    fn body_len(&self) -> u16 {
        let teid_len: usize = if self.header.teid.is_some() { 4 } else { 0 };
        let ies: usize = self.ies.iter().map(Ie::encoded_len).sum();
        // sequence + spare octet, then TEID, then the IE sequence
        (4 + teid_len + ies) as u16
    }

    pub fn encode(&self) -> BytesMut {
        let mut header = self.header.clone();
        header.length = self.body_len();

        let mut buf = BytesMut::with_capacity(4 + header.length as usize);
        header.encode(&mut buf);
        for ie in &self.ies {
            ie.encode(&mut buf);
        }
        buf
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        let header = Header::decode(buf)?;

        let consumed_after_length = if header.teid.is_some() { 8 } else { 4 };
        let ie_bytes = (header.length as usize)
            .checked_sub(consumed_after_length)
            .ok_or_else(|| GtpError::Malformed("header length shorter than header".into()))?;

        if buf.remaining() < ie_bytes {
            return Err(GtpError::BufferTooShort {
                needed: ie_bytes,
                available: buf.remaining(),
            });
        }

        let mut body = buf.copy_to_bytes(ie_bytes);
        let mut ies = Vec::new();
        while body.has_remaining() {
            ies.push(Ie::decode(&mut body)?);
        }

        Ok(Self { header, ies })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_request_literal_bytes() {
        let msg = Message::echo_request(1);
        let encoded = msg.encode();
        assert_eq!(
            &encoded[..],
            &[0x40, 0x01, 0x00, 0x04, 0x00, 0x00, 0x01, 0x00]
        );

        let decoded = Message::decode(&mut encoded.freeze()).unwrap();
        assert_eq!(decoded.encode(), msg.encode());
    }

    #[test]
    fn test_echo_response_carries_recovery() {
        let msg = Message::echo_response(0x0a0b0c, 42);
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();

        assert_eq!(decoded.sequence(), 0x0a0b0c);
        let recovery = decoded.get_ie_by_type(IeType::Recovery as u8).unwrap();
        assert_eq!(recovery.as_recovery().unwrap(), 42);
    }

    #[test]
    fn test_create_session_roundtrip() {
        let msg = Message::create_session_request(
            0x1111_2222,
            0x30,
            vec![
                Ie::imsi("001010000000001").unwrap(),
                Ie::rat_type(6),
                Ie::apn("internet"),
            ],
        );
        let mut bytes = msg.encode().freeze();
        let decoded = Message::decode(&mut bytes).unwrap();

        assert_eq!(decoded, msg);
        assert!(bytes.is_empty());
        assert_eq!(decoded.teid(), 0x1111_2222);
        assert_eq!(
            decoded.require_ie(IeType::Imsi, 0).unwrap().as_imsi().unwrap(),
            "001010000000001"
        );
    }

    #[test]
    fn test_instance_lookup_is_total() {
        let mut msg = Message::echo_request(9);
        msg.add_ie(Ie::recovery(1));
        msg.add_ie(Ie::recovery(2).with_instance(1));

        assert_eq!(msg.get_ie(3, 0).unwrap().as_recovery().unwrap(), 1);
        assert_eq!(msg.get_ie(3, 1).unwrap().as_recovery().unwrap(), 2);
        assert!(msg.get_ie(3, 2).is_none());
        assert!(matches!(
            msg.require_ie(IeType::Imsi, 0),
            Err(GtpError::RequiredIeMissing(1))
        ));
    }

    #[test]
    fn test_unknown_message_type_roundtrips() {
        let msg = Message::with_teid_raw(0xf7, 5, 8, vec![Ie::recovery(3)]);
        let encoded = msg.encode();
        let decoded = Message::decode(&mut encoded.clone().freeze()).unwrap();
        assert_eq!(decoded.encode(), encoded);
        assert_eq!(decoded.type_name(), "Unknown");
    }

    #[test]
    fn test_truncated_body_rejected() {
        let msg = Message::echo_response(1, 9);
        let encoded = msg.encode();
        let mut short = encoded.freeze().slice(..10);
        assert!(matches!(
            Message::decode(&mut short),
            Err(GtpError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_piggyback_tail_left_in_buffer() {
        let first = Message::echo_response(1, 9).encode();
        let second = Message::echo_request(2).encode();
        let mut combined = BytesMut::new();
        combined.extend_from_slice(&first);
        combined.extend_from_slice(&second);

        let mut buf = combined.freeze();
        let a = Message::decode(&mut buf).unwrap();
        assert_eq!(a.sequence(), 1);
        let b = Message::decode(&mut buf).unwrap();
        assert_eq!(b.sequence(), 2);
        assert!(buf.is_empty());
    }
}
