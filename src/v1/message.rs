//! GTPv1 messages
//!
//! One structure serves both planes: signalling messages carry IEs, G-PDUs
//! carry an opaque payload. The header length field covers everything after
//! the mandatory 8 bytes, optional tail and extension headers included.

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::v1::header::{Header, MsgType};
use crate::v1::ie::{Ie, TlvType, TvType};

/// A GTPv1 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub ies: Vec<Ie>,
    /// Inner packet of a G-PDU; empty for signalling messages
    pub payload: Option<Bytes>,
}

impl Message {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            ies: Vec::new(),
            payload: None,
        }
    }

    pub fn echo_request(sequence: u16) -> Self {
        Self::new(Header::with_sequence(MsgType::EchoRequest as u8, 0, sequence))
    }

    pub fn echo_response(sequence: u16, restart_counter: u8) -> Self {
        let mut msg = Self::new(Header::with_sequence(
            MsgType::EchoResponse as u8,
            0,
            sequence,
        ));
        msg.ies.push(Ie::recovery(restart_counter));
        msg
    }

    pub fn version_not_supported(sequence: u16) -> Self {
        Self::new(Header::with_sequence(
            MsgType::VersionNotSupported as u8,
            0,
            sequence,
        ))
    }

    /// User-plane packet encapsulating `payload`.
    pub fn gpdu(teid: u32, payload: Bytes) -> Self {
        let mut msg = Self::new(Header::new(MsgType::GPdu as u8, teid));
        msg.payload = Some(payload);
        msg
    }

    /// Error Indication identifying the unknown tunnel and this node's
    /// U-plane address.
    pub fn error_indication(teid: u32, peer_addr: IpAddr) -> Self {
        let mut msg = Self::new(Header::new(MsgType::ErrorIndication as u8, 0));
        msg.ies.push(Ie::teid_data_i(teid));
        msg.ies.push(Ie::gsn_address(peer_addr));
        msg
    }

    pub fn end_marker(teid: u32) -> Self {
        Self::new(Header::new(MsgType::EndMarker as u8, teid))
    }

    /// Advertise the extension header types this node understands
    /// (Extension Header Type List IE).
    pub fn supported_extension_headers_notification(types: &[u8]) -> Self {
        let mut msg = Self::new(Header::new(
            MsgType::SupportedExtensionHeadersNotification as u8,
            0,
        ));
        msg.ies.push(Ie::from_slice(141, types));
        msg
    }

    pub fn create_pdp_context_request(teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        Self::signalling(MsgType::CreatePdpContextRequest, teid, sequence, ies)
    }

    pub fn create_pdp_context_response(teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        Self::signalling(MsgType::CreatePdpContextResponse, teid, sequence, ies)
    }

    pub fn update_pdp_context_request(teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        Self::signalling(MsgType::UpdatePdpContextRequest, teid, sequence, ies)
    }

    pub fn update_pdp_context_response(teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        Self::signalling(MsgType::UpdatePdpContextResponse, teid, sequence, ies)
    }

    pub fn delete_pdp_context_request(teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        Self::signalling(MsgType::DeletePdpContextRequest, teid, sequence, ies)
    }

    pub fn delete_pdp_context_response(teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        Self::signalling(MsgType::DeletePdpContextResponse, teid, sequence, ies)
    }

    fn signalling(msg_type: MsgType, teid: u32, sequence: u16, ies: Vec<Ie>) -> Self {
        let mut msg = Self::new(Header::with_sequence(msg_type as u8, teid, sequence));
        msg.ies = ies;
        msg
    }

    pub fn add_ie(&mut self, ie: Ie) {
        self.ies.push(ie);
    }

    pub fn get_ie(&self, ie_type: u8) -> Option<&Ie> {
        self.ies.iter().find(|ie| ie.ie_type == ie_type)
    }

    pub fn get_ies(&self, ie_type: u8) -> Vec<&Ie> {
        self.ies.iter().filter(|ie| ie.ie_type == ie_type).collect()
    }

    pub fn require_tv(&self, ie_type: TvType) -> GtpResult<&Ie> {
        self.get_ie(ie_type as u8)
            .ok_or(GtpError::RequiredIeMissing(ie_type as u8))
    }

    pub fn require_tlv(&self, ie_type: TlvType) -> GtpResult<&Ie> {
        self.get_ie(ie_type as u8)
            .ok_or(GtpError::RequiredIeMissing(ie_type as u8))
    }

    pub fn msg_type(&self) -> u8 {
        self.header.msg_type
    }

    pub fn teid(&self) -> u32 {
        self.header.teid
    }

    pub fn sequence(&self) -> Option<u16> {
        self.header.sequence
    }

    pub fn type_name(&self) -> &'static str {
        MsgType::name(self.header.msg_type)
    }

    pub fn encode(&self) -> BytesMut {
        let mut header = self.header.clone();
        let body: usize = self.ies.iter().map(Ie::encoded_len).sum::<usize>()
            + self.payload.as_ref().map_or(0, Bytes::len);
        header.length = (header.encoded_len() - super::header::HEADER_LEN + body) as u16;

        let mut buf = BytesMut::with_capacity(header.encoded_len() + body);
        header.encode(&mut buf);
        for ie in &self.ies {
            ie.encode(&mut buf);
        }
        if let Some(ref payload) = self.payload {
            buf.put_slice(payload);
        }
        buf
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        let before = buf.remaining();
        let header = Header::decode(buf)?;
        let header_read = before - buf.remaining();

        let body_len = (header.length as usize)
            .checked_sub(header_read - super::header::HEADER_LEN)
            .ok_or_else(|| GtpError::Malformed("header length shorter than options".into()))?;

        if buf.remaining() < body_len {
            return Err(GtpError::BufferTooShort {
                needed: body_len,
                available: buf.remaining(),
            });
        }

        let mut msg = Self::new(header);

        if msg.header.msg_type == MsgType::GPdu as u8 {
            msg.payload = Some(buf.copy_to_bytes(body_len));
            return Ok(msg);
        }

        let mut body = buf.copy_to_bytes(body_len);
        while body.has_remaining() {
            msg.ies.push(Ie::decode(&mut body)?);
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_echo_roundtrip() {
        let msg = Message::echo_request(0x1234);
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.sequence(), Some(0x1234));
    }

    #[test]
    fn test_echo_response_recovery() {
        let msg = Message::echo_response(7, 42);
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(
            decoded.require_tv(TvType::Recovery).unwrap().as_recovery().unwrap(),
            42
        );
    }

    #[test]
    fn test_gpdu_payload_preserved() {
        let payload = Bytes::from_static(&[0x45, 0x00, 0x00, 0x14, 1, 2, 3, 4]);
        let msg = Message::gpdu(0xdead_0001, payload.clone());
        let encoded = msg.encode();
        // length counts only the payload for a plain 8-byte header
        assert_eq!(encoded[2], 0);
        assert_eq!(encoded[3], payload.len() as u8);

        let decoded = Message::decode(&mut encoded.freeze()).unwrap();
        assert_eq!(decoded.payload, Some(payload));
    }

    #[test]
    fn test_error_indication_roundtrip() {
        let msg = Message::error_indication(0xbad0_0001, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)));
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();

        assert_eq!(
            decoded.require_tv(TvType::TeidDataI).unwrap().as_teid().unwrap(),
            0xbad0_0001
        );
        assert_eq!(
            decoded
                .require_tlv(TlvType::GsnAddress)
                .unwrap()
                .as_gsn_address()
                .unwrap(),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))
        );
    }

    #[test]
    fn test_create_pdp_context_request_roundtrip() {
        let msg = Message::create_pdp_context_request(
            0,
            0x55,
            vec![
                Ie::imsi("001010123456789").unwrap(),
                Ie::teid_c_plane(0x100),
                Ie::nsapi(5),
                Ie::apn("internet"),
                Ie::gsn_address(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2))),
            ],
        );
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(
            decoded.require_tv(TvType::Imsi).unwrap().as_imsi().unwrap(),
            "001010123456789"
        );
    }

    #[test]
    fn test_supported_extension_headers_notification() {
        let msg = Message::supported_extension_headers_notification(&[0x40, 0x85]);
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(decoded.get_ie(141).unwrap().value.as_ref(), [0x40, 0x85]);
    }

    #[test]
    fn test_end_marker() {
        let msg = Message::end_marker(0x77);
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(decoded.msg_type(), MsgType::EndMarker as u8);
        assert_eq!(decoded.teid(), 0x77);
    }
}
