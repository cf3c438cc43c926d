//! GTPv0 header
//!
//! GTPv0 (GSM 09.60) uses a fixed 20-byte header: flags, type, length,
//! 16-bit sequence number, flow label, SNDCP N-PDU number, three 0xFF spare
//! octets and the 64-bit TID (a TBCD-coded IMSI+NSAPI). The length field
//! excludes the header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};

/// Fixed header length
pub const HEADER_LEN: usize = 20;

const FLAG_PT: u8 = 0x10;
const FLAG_SPARE: u8 = 0x0E;
const FLAG_SNN: u8 = 0x01;

/// GTPv0 message types (the subset this stack speaks)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    EchoRequest = 1,
    EchoResponse = 2,
    VersionNotSupported = 3,
    CreatePdpContextRequest = 16,
    CreatePdpContextResponse = 17,
    UpdatePdpContextRequest = 18,
    UpdatePdpContextResponse = 19,
    DeletePdpContextRequest = 20,
    DeletePdpContextResponse = 21,
    ErrorIndication = 26,
    TPdu = 255,
}

impl MsgType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use MsgType::*;
        Some(match value {
            1 => EchoRequest,
            2 => EchoResponse,
            3 => VersionNotSupported,
            16 => CreatePdpContextRequest,
            17 => CreatePdpContextResponse,
            18 => UpdatePdpContextRequest,
            19 => UpdatePdpContextResponse,
            20 => DeletePdpContextRequest,
            21 => DeletePdpContextResponse,
            26 => ErrorIndication,
            255 => TPdu,
            _ => return None,
        })
    }
}

/// GTPv0 message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Protocol type: true for GTP, false for GTP'
    pub pt: bool,
    /// SNDCP N-PDU number flag
    pub snn: bool,
    pub msg_type: u8,
    /// Bytes after the 20-byte header; recomputed on encode
    pub length: u16,
    pub sequence: u16,
    pub flow_label: u16,
    /// SNDCP N-PDU number, 0xFF when unused
    pub sndcp_number: u8,
    /// Tunnel identifier (TBCD-coded)
    pub tid: u64,
}

impl Header {
    pub fn new(msg_type: u8, sequence: u16, flow_label: u16, tid: u64) -> Self {
        Self {
            pt: true,
            snn: false,
            msg_type,
            length: 0,
            sequence,
            flow_label,
            sndcp_number: 0xFF,
            tid,
        }
    }

    fn flags(&self) -> u8 {
        // version 0, spare bits fixed to 1
        let mut flags = FLAG_SPARE;
        if self.pt {
            flags |= FLAG_PT;
        }
        if self.snn {
            flags |= FLAG_SNN;
        }
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.msg_type);
        buf.put_u16(self.length);
        buf.put_u16(self.sequence);
        buf.put_u16(self.flow_label);
        buf.put_u8(self.sndcp_number);
        buf.put_slice(&[0xFF, 0xFF, 0xFF]);
        buf.put_u64(self.tid);
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(GtpError::BufferTooShort {
                needed: HEADER_LEN,
                available: buf.remaining(),
            });
        }

        let flags = buf.get_u8();
        let version = flags >> 5;
        if version != 0 {
            return Err(GtpError::InvalidVersion(version));
        }

        let msg_type = buf.get_u8();
        let length = buf.get_u16();
        let sequence = buf.get_u16();
        let flow_label = buf.get_u16();
        let sndcp_number = buf.get_u8();
        buf.advance(3);
        let tid = buf.get_u64();

        Ok(Self {
            pt: flags & FLAG_PT != 0,
            snn: flags & FLAG_SNN != 0,
            msg_type,
            length,
            sequence,
            flow_label,
            sndcp_number,
            tid,
        })
    }
}
