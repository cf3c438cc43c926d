//! GTPv1 header
//!
//! Shared by GTPv1-C signalling and GTP-U user-plane framing (3GPP TS
//! 29.060 / 29.281). The mandatory part is 8 bytes; a 4-byte tail (sequence
//! number, N-PDU number, next-extension type) is present when any of the
//! E/S/PN flags is set, followed by extension headers in 4-octet units while
//! the E flag chain continues.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};

/// Mandatory header length
pub const HEADER_LEN: usize = 8;

/// Header length with the optional tail
pub const HEADER_LEN_WITH_TAIL: usize = 12;

const FLAG_PT: u8 = 0x10;
const FLAG_E: u8 = 0x04;
const FLAG_S: u8 = 0x02;
const FLAG_PN: u8 = 0x01;

/// GTPv1 message types (control plane and user plane share the space)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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
    PduNotificationRequest = 27,
    PduNotificationResponse = 28,
    SupportedExtensionHeadersNotification = 31,
    EndMarker = 254,
    GPdu = 255,
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
            27 => PduNotificationRequest,
            28 => PduNotificationResponse,
            31 => SupportedExtensionHeadersNotification,
            254 => EndMarker,
            255 => GPdu,
            _ => return None,
        })
    }

    pub fn name(value: u8) -> &'static str {
        use MsgType::*;
        match Self::from_u8(value) {
            Some(EchoRequest) => "Echo Request",
            Some(EchoResponse) => "Echo Response",
            Some(VersionNotSupported) => "Version Not Supported",
            Some(CreatePdpContextRequest) => "Create PDP Context Request",
            Some(CreatePdpContextResponse) => "Create PDP Context Response",
            Some(UpdatePdpContextRequest) => "Update PDP Context Request",
            Some(UpdatePdpContextResponse) => "Update PDP Context Response",
            Some(DeletePdpContextRequest) => "Delete PDP Context Request",
            Some(DeletePdpContextResponse) => "Delete PDP Context Response",
            Some(ErrorIndication) => "Error Indication",
            Some(PduNotificationRequest) => "PDU Notification Request",
            Some(PduNotificationResponse) => "PDU Notification Response",
            Some(SupportedExtensionHeadersNotification) => {
                "Supported Extension Headers Notification"
            }
            Some(EndMarker) => "End Marker",
            Some(GPdu) => "G-PDU",
            None => "Unknown",
        }
    }

    /// Response type for a request type, where one exists.
    pub fn response_for(request: u8) -> Option<u8> {
        use MsgType::*;
        let rsp = match Self::from_u8(request)? {
            EchoRequest => EchoResponse,
            CreatePdpContextRequest => CreatePdpContextResponse,
            UpdatePdpContextRequest => UpdatePdpContextResponse,
            DeletePdpContextRequest => DeletePdpContextResponse,
            PduNotificationRequest => PduNotificationResponse,
            _ => return None,
        };
        Some(rsp as u8)
    }
}

/// One extension header: type tag plus content. The wire unit is
/// `length(1) | content | next_type(1)` where length counts 4-octet units,
/// so `content.len() + 2` must be a multiple of 4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub ext_type: u8,
    pub content: Bytes,
}

impl ExtensionHeader {
    /// UDP Port extension (type 0x40).
    pub fn udp_port(port: u16) -> Self {
        Self {
            ext_type: 0x40,
            content: Bytes::copy_from_slice(&port.to_be_bytes()),
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.content.len()
    }
}

/// GTPv1 message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Protocol type: true for GTP, false for GTP'
    pub pt: bool,
    pub msg_type: u8,
    /// Bytes after the mandatory 8-byte header; recomputed on encode
    pub length: u16,
    pub teid: u32,
    /// 16-bit sequence number (S flag)
    pub sequence: Option<u16>,
    /// N-PDU number (PN flag)
    pub npdu: Option<u8>,
    /// Extension header chain (E flag)
    pub extensions: Vec<ExtensionHeader>,
}

impl Header {
    pub fn new(msg_type: u8, teid: u32) -> Self {
        Self {
            pt: true,
            msg_type,
            length: 0,
            teid,
            sequence: None,
            npdu: None,
            extensions: Vec::new(),
        }
    }

    pub fn with_sequence(msg_type: u8, teid: u32, sequence: u16) -> Self {
        let mut header = Self::new(msg_type, teid);
        header.sequence = Some(sequence);
        header
    }

    fn has_tail(&self) -> bool {
        self.sequence.is_some() || self.npdu.is_some() || !self.extensions.is_empty()
    }

    /// Encoded header length, extension chain included.
    pub fn encoded_len(&self) -> usize {
        if self.has_tail() {
            HEADER_LEN_WITH_TAIL + self.extensions.iter().map(ExtensionHeader::encoded_len).sum::<usize>()
        } else {
            HEADER_LEN
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 1 << 5;
        if self.pt {
            flags |= FLAG_PT;
        }
        if !self.extensions.is_empty() {
            flags |= FLAG_E;
        }
        if self.sequence.is_some() {
            flags |= FLAG_S;
        }
        if self.npdu.is_some() {
            flags |= FLAG_PN;
        }
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.msg_type);
        buf.put_u16(self.length);
        buf.put_u32(self.teid);

        if self.has_tail() {
            buf.put_u16(self.sequence.unwrap_or(0));
            buf.put_u8(self.npdu.unwrap_or(0));
            buf.put_u8(self.extensions.first().map_or(0, |e| e.ext_type));

            for (i, ext) in self.extensions.iter().enumerate() {
                debug_assert_eq!(ext.encoded_len() % 4, 0);
                buf.put_u8((ext.encoded_len() / 4) as u8);
                buf.put_slice(&ext.content);
                buf.put_u8(self.extensions.get(i + 1).map_or(0, |e| e.ext_type));
            }
        }
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
        if version != 1 {
            return Err(GtpError::InvalidVersion(version));
        }

        let msg_type = buf.get_u8();
        let length = buf.get_u16();
        let teid = buf.get_u32();

        let mut header = Self {
            pt: flags & FLAG_PT != 0,
            msg_type,
            length,
            teid,
            sequence: None,
            npdu: None,
            extensions: Vec::new(),
        };

        if flags & (FLAG_E | FLAG_S | FLAG_PN) == 0 {
            return Ok(header);
        }

        if buf.remaining() < 4 {
            return Err(GtpError::BufferTooShort {
                needed: 4,
                available: buf.remaining(),
            });
        }

        let sequence = buf.get_u16();
        let npdu = buf.get_u8();
        let mut next_type = buf.get_u8();

        if flags & FLAG_S != 0 {
            header.sequence = Some(sequence);
        }
        if flags & FLAG_PN != 0 {
            header.npdu = Some(npdu);
        }

        if flags & FLAG_E != 0 {
            while next_type != 0 {
                if buf.remaining() < 1 {
                    return Err(GtpError::BufferTooShort {
                        needed: 1,
                        available: 0,
                    });
                }
                let units = buf.get_u8() as usize;
                if units == 0 {
                    return Err(GtpError::Malformed("zero-length extension header".into()));
                }
                let body = units * 4 - 2;
                if buf.remaining() < body + 1 {
                    return Err(GtpError::BufferTooShort {
                        needed: body + 1,
                        available: buf.remaining(),
                    });
                }
                let content = buf.copy_to_bytes(body);
                header.extensions.push(ExtensionHeader {
                    ext_type: next_type,
                    content,
                });
                next_type = buf.get_u8();
            }
        }

        Ok(header)
    }
}
