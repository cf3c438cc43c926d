//! GTPv0 messages
//!
//! GTPv0 IEs follow the same TV/TLV discipline as GTPv1 and the type values
//! this stack exercises coincide, so messages carry [`crate::v1::Ie`]
//! elements rather than a third IE codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::tbcd;
use crate::v0::header::{Header, MsgType, HEADER_LEN};
use crate::v1::ie::Ie;

/// A GTPv0 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub ies: Vec<Ie>,
    /// Inner packet of a T-PDU
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

    pub fn echo_request(sequence: u16, flow_label: u16, tid: u64) -> Self {
        Self::new(Header::new(MsgType::EchoRequest as u8, sequence, flow_label, tid))
    }

    pub fn echo_response(sequence: u16, flow_label: u16, tid: u64, restart_counter: u8) -> Self {
        let mut msg = Self::new(Header::new(
            MsgType::EchoResponse as u8,
            sequence,
            flow_label,
            tid,
        ));
        msg.ies.push(Ie::recovery(restart_counter));
        msg
    }

    /// T-PDU encapsulating a user packet.
    pub fn tpdu(sequence: u16, flow_label: u16, tid: u64, payload: Bytes) -> Self {
        let mut msg = Self::new(Header::new(MsgType::TPdu as u8, sequence, flow_label, tid));
        msg.payload = Some(payload);
        msg
    }

    pub fn get_ie(&self, ie_type: u8) -> Option<&Ie> {
        self.ies.iter().find(|ie| ie.ie_type == ie_type)
    }

    pub fn msg_type(&self) -> u8 {
        self.header.msg_type
    }

    pub fn sequence(&self) -> u16 {
        self.header.sequence
    }

    /// TID digits decoded from the TBCD header field.
    pub fn tid_digits(&self) -> String {
        tbcd::decode(&self.header.tid.to_be_bytes())
    }

    pub fn encode(&self) -> BytesMut {
        let mut header = self.header.clone();
        let body: usize = self.ies.iter().map(Ie::encoded_len).sum::<usize>()
            + self.payload.as_ref().map_or(0, Bytes::len);
        header.length = body as u16;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body);
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
        let header = Header::decode(buf)?;
        let body_len = header.length as usize;

        if buf.remaining() < body_len {
            return Err(GtpError::BufferTooShort {
                needed: body_len,
                available: buf.remaining(),
            });
        }

        let mut msg = Self::new(header);

        if msg.header.msg_type == MsgType::TPdu as u8 {
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
    use crate::v1::ie::TvType;

    #[test]
    fn test_echo_request_literal_bytes() {
        let msg = Message::echo_request(1, 0, 0x2143_6587_0921_4355);
        let encoded = msg.encode();
        assert_eq!(
            &encoded[..],
            &[
                0x1e, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x21,
                0x43, 0x65, 0x87, 0x09, 0x21, 0x43, 0x55
            ]
        );
    }

    #[test]
    fn test_echo_response_roundtrip() {
        let msg = Message::echo_response(2, 0, 0x2143_6587_0921_4355, 9);
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(
            decoded.get_ie(TvType::Recovery as u8).unwrap().as_recovery().unwrap(),
            9
        );
    }

    #[test]
    fn test_tid_digits() {
        let msg = Message::echo_request(1, 0, 0x2143_6587_0921_4355);
        assert_eq!(msg.tid_digits(), "1234567890123455");
    }

    #[test]
    fn test_tpdu_roundtrip() {
        let payload = Bytes::from_static(b"inner ip packet");
        let msg = Message::tpdu(5, 0x10, 0, payload.clone());
        let decoded = Message::decode(&mut msg.encode().freeze()).unwrap();
        assert_eq!(decoded.payload, Some(payload));
    }
}
