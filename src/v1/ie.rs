//! GTPv1 information elements
//!
//! Two wire disciplines share the type space: TV IEs (type < 128) carry a
//! fixed per-type length that is not on the wire, TLV IEs (type >= 128)
//! carry a 2-byte length. The codec keeps values opaque and interprets them
//! through typed accessors.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::tbcd;

/// TV IE types (fixed length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TvType {
    Cause = 1,
    Imsi = 2,
    Rai = 3,
    Tlli = 4,
    PTmsi = 5,
    ReorderingRequired = 8,
    Recovery = 14,
    SelectionMode = 15,
    TeidDataI = 16,
    TeidCPlane = 17,
    TeidDataII = 18,
    TeardownInd = 19,
    Nsapi = 20,
    ChargingCharacteristics = 26,
    TraceReference = 27,
    TraceType = 28,
    ChargingId = 127,
}

/// TLV IE types (explicit length)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvType {
    EndUserAddress = 128,
    AccessPointName = 131,
    ProtocolConfigurationOptions = 132,
    GsnAddress = 133,
    Msisdn = 134,
    QosProfile = 135,
    CommonFlags = 148,
    RatType = 151,
    UserLocationInformation = 152,
    MsTimeZone = 153,
    Imeisv = 154,
}

/// Whether a type value uses the TV discipline.
pub fn is_tv(ie_type: u8) -> bool {
    ie_type < 128
}

/// Fixed value length of a TV IE, `None` for types outside the table.
pub fn tv_len(ie_type: u8) -> Option<usize> {
    Some(match ie_type {
        1 => 1,  // Cause
        2 => 8,  // IMSI
        3 => 6,  // RAI
        4 => 4,  // TLLI
        5 => 4,  // P-TMSI
        8 => 1,  // Reordering Required
        14 => 1, // Recovery
        15 => 1, // Selection Mode
        16 => 4, // TEID Data I
        17 => 4, // TEID Control Plane
        18 => 5, // TEID Data II
        19 => 1, // Teardown Ind
        20 => 1, // NSAPI
        26 => 2, // Charging Characteristics
        27 => 2, // Trace Reference
        28 => 2, // Trace Type
        127 => 4, // Charging ID
        _ => return None,
    })
}

/// A GTPv1 information element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ie {
    pub ie_type: u8,
    pub value: Bytes,
}

impl Ie {
    pub fn new(ie_type: u8, value: Bytes) -> Self {
        Self { ie_type, value }
    }

    pub fn from_slice(ie_type: u8, value: &[u8]) -> Self {
        Self::new(ie_type, Bytes::copy_from_slice(value))
    }

    pub fn encoded_len(&self) -> usize {
        if is_tv(self.ie_type) {
            1 + self.value.len()
        } else {
            3 + self.value.len()
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ie_type);
        if !is_tv(self.ie_type) {
            buf.put_u16(self.value.len() as u16);
        }
        buf.put_slice(&self.value);
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if !buf.has_remaining() {
            return Err(GtpError::BufferTooShort {
                needed: 1,
                available: 0,
            });
        }

        let ie_type = buf.get_u8();
        let length = if is_tv(ie_type) {
            // a TV type outside the table cannot be skipped safely
            tv_len(ie_type).ok_or_else(|| {
                GtpError::Malformed(format!("unknown fixed-length IE type {ie_type}"))
            })?
        } else {
            if buf.remaining() < 2 {
                return Err(GtpError::BufferTooShort {
                    needed: 2,
                    available: buf.remaining(),
                });
            }
            buf.get_u16() as usize
        };

        if buf.remaining() < length {
            return Err(GtpError::BufferTooShort {
                needed: length,
                available: buf.remaining(),
            });
        }

        Ok(Self {
            ie_type,
            value: buf.copy_to_bytes(length),
        })
    }

    fn expect(&self, wanted: u8) -> GtpResult<()> {
        if self.ie_type == wanted {
            Ok(())
        } else {
            Err(GtpError::WrongIeType {
                wanted,
                got: self.ie_type,
            })
        }
    }

    fn need(&self, len: usize) -> GtpResult<()> {
        if self.value.len() < len {
            return Err(GtpError::InvalidIeLength {
                ie_type: self.ie_type,
                expected: len,
                actual: self.value.len(),
            });
        }
        Ok(())
    }
}

// Constructors.
impl Ie {
    pub fn cause(value: u8) -> Self {
        Self::from_slice(TvType::Cause as u8, &[value])
    }

    /// IMSI occupies all 8 TBCD octets; shorter IMSIs are 0xF-padded.
    pub fn imsi(digits: &str) -> GtpResult<Self> {
        let mut raw = tbcd::encode(digits)?;
        if raw.len() > 8 {
            return Err(GtpError::Malformed("IMSI longer than 15 digits".into()));
        }
        raw.resize(8, 0xFF);
        Ok(Self::new(TvType::Imsi as u8, raw.into()))
    }

    pub fn recovery(restart_counter: u8) -> Self {
        Self::from_slice(TvType::Recovery as u8, &[restart_counter])
    }

    pub fn selection_mode(mode: u8) -> Self {
        Self::from_slice(TvType::SelectionMode as u8, &[0xFC | (mode & 0x03)])
    }

    pub fn teid_data_i(teid: u32) -> Self {
        Self::from_slice(TvType::TeidDataI as u8, &teid.to_be_bytes())
    }

    pub fn teid_c_plane(teid: u32) -> Self {
        Self::from_slice(TvType::TeidCPlane as u8, &teid.to_be_bytes())
    }

    pub fn teardown_ind(teardown: bool) -> Self {
        Self::from_slice(TvType::TeardownInd as u8, &[0xFE | u8::from(teardown)])
    }

    pub fn nsapi(nsapi: u8) -> Self {
        Self::from_slice(TvType::Nsapi as u8, &[nsapi & 0x0F])
    }

    pub fn charging_id(id: u32) -> Self {
        Self::from_slice(TvType::ChargingId as u8, &id.to_be_bytes())
    }

    /// End User Address for an allocated address, or empty (dynamic
    /// allocation requested) when `addr` is `None`.
    pub fn end_user_address(addr: Option<IpAddr>) -> Self {
        let mut buf = BytesMut::with_capacity(18);
        match addr {
            None => {
                buf.put_u8(0xF1);
                buf.put_u8(0x21);
            }
            Some(IpAddr::V4(v4)) => {
                buf.put_u8(0xF1);
                buf.put_u8(0x21);
                buf.put_slice(&v4.octets());
            }
            Some(IpAddr::V6(v6)) => {
                buf.put_u8(0xF1);
                buf.put_u8(0x57);
                buf.put_slice(&v6.octets());
            }
        }
        Self::new(TlvType::EndUserAddress as u8, buf.freeze())
    }

    pub fn apn(name: &str) -> Self {
        let mut buf = BytesMut::with_capacity(name.len() + 1);
        for label in name.split('.') {
            buf.put_u8(label.len() as u8);
            buf.put_slice(label.as_bytes());
        }
        Self::new(TlvType::AccessPointName as u8, buf.freeze())
    }

    pub fn gsn_address(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::from_slice(TlvType::GsnAddress as u8, &v4.octets()),
            IpAddr::V6(v6) => Self::from_slice(TlvType::GsnAddress as u8, &v6.octets()),
        }
    }

    /// MSISDN with the international-number address octet.
    pub fn msisdn(digits: &str) -> GtpResult<Self> {
        let mut buf = vec![0x91];
        buf.extend(tbcd::encode(digits)?);
        Ok(Self::new(TlvType::Msisdn as u8, buf.into()))
    }

    /// QoS profile: allocation/retention priority octet plus the QoS data
    /// octets (TS 24.008 coding, see [`crate::v1::types`] for the bit-rate
    /// helpers).
    pub fn qos_profile(arp: u8, qos_data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(1 + qos_data.len());
        buf.put_u8(arp);
        buf.put_slice(qos_data);
        Self::new(TlvType::QosProfile as u8, buf.freeze())
    }

    pub fn rat_type(rat: u8) -> Self {
        Self::from_slice(TlvType::RatType as u8, &[rat])
    }

    pub fn common_flags(flags: u8) -> Self {
        Self::from_slice(TlvType::CommonFlags as u8, &[flags])
    }

    pub fn ms_time_zone(quarter_hours: i16, dst: u8) -> Self {
        let q = quarter_hours.unsigned_abs() as u8;
        let mut tz = ((q % 10) << 4) | ((q / 10) & 0x07);
        if quarter_hours < 0 {
            tz |= 0x08;
        }
        Self::from_slice(TlvType::MsTimeZone as u8, &[tz, dst & 0x03])
    }

    pub fn imeisv(digits: &str) -> GtpResult<Self> {
        Ok(Self::new(TlvType::Imeisv as u8, tbcd::encode(digits)?.into()))
    }

    pub fn uli(data: &[u8]) -> Self {
        Self::from_slice(TlvType::UserLocationInformation as u8, data)
    }
}

// Accessors.
impl Ie {
    pub fn as_cause(&self) -> GtpResult<u8> {
        self.expect(TvType::Cause as u8)?;
        self.need(1)?;
        Ok(self.value[0])
    }

    pub fn as_imsi(&self) -> GtpResult<String> {
        self.expect(TvType::Imsi as u8)?;
        self.need(8)?;
        Ok(tbcd::decode(&self.value))
    }

    pub fn as_recovery(&self) -> GtpResult<u8> {
        self.expect(TvType::Recovery as u8)?;
        self.need(1)?;
        Ok(self.value[0])
    }

    /// TEID out of either TEID Data I or TEID Control Plane.
    pub fn as_teid(&self) -> GtpResult<u32> {
        if self.ie_type != TvType::TeidDataI as u8 && self.ie_type != TvType::TeidCPlane as u8 {
            return Err(GtpError::WrongIeType {
                wanted: TvType::TeidDataI as u8,
                got: self.ie_type,
            });
        }
        self.need(4)?;
        let mut v = self.value.clone();
        Ok(v.get_u32())
    }

    pub fn as_nsapi(&self) -> GtpResult<u8> {
        self.expect(TvType::Nsapi as u8)?;
        self.need(1)?;
        Ok(self.value[0] & 0x0F)
    }

    pub fn as_teardown_ind(&self) -> GtpResult<bool> {
        self.expect(TvType::TeardownInd as u8)?;
        self.need(1)?;
        Ok(self.value[0] & 0x01 != 0)
    }

    pub fn as_selection_mode(&self) -> GtpResult<u8> {
        self.expect(TvType::SelectionMode as u8)?;
        self.need(1)?;
        Ok(self.value[0] & 0x03)
    }

    pub fn as_charging_id(&self) -> GtpResult<u32> {
        self.expect(TvType::ChargingId as u8)?;
        self.need(4)?;
        let mut v = self.value.clone();
        Ok(v.get_u32())
    }

    /// The allocated address out of an End User Address IE, `None` when the
    /// IE only names the PDP type (dynamic allocation).
    pub fn as_end_user_address(&self) -> GtpResult<Option<IpAddr>> {
        self.expect(TlvType::EndUserAddress as u8)?;
        self.need(2)?;
        match (self.value[1], self.value.len()) {
            (0x21, 2) | (0x57, 2) => Ok(None),
            (0x21, 6) => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.value[2..6]);
                Ok(Some(IpAddr::V4(Ipv4Addr::from(o))))
            }
            (0x57, 18) => {
                let mut o = [0u8; 16];
                o.copy_from_slice(&self.value[2..18]);
                Ok(Some(IpAddr::V6(Ipv6Addr::from(o))))
            }
            (t, n) => Err(GtpError::Malformed(format!(
                "end user address type {t:#x} with {n} bytes"
            ))),
        }
    }

    pub fn as_apn(&self) -> GtpResult<String> {
        self.expect(TlvType::AccessPointName as u8)?;
        let mut labels = Vec::new();
        let mut rest = &self.value[..];
        while let Some((&len, tail)) = rest.split_first() {
            let len = len as usize;
            if tail.len() < len {
                return Err(GtpError::Malformed("APN label overruns IE value".into()));
            }
            labels.push(String::from_utf8_lossy(&tail[..len]).into_owned());
            rest = &tail[len..];
        }
        Ok(labels.join("."))
    }

    pub fn as_gsn_address(&self) -> GtpResult<IpAddr> {
        self.expect(TlvType::GsnAddress as u8)?;
        match self.value.len() {
            4 => {
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.value);
                Ok(IpAddr::V4(o.into()))
            }
            16 => {
                let mut o = [0u8; 16];
                o.copy_from_slice(&self.value);
                Ok(IpAddr::V6(o.into()))
            }
            n => Err(GtpError::InvalidIeLength {
                ie_type: self.ie_type,
                expected: 4,
                actual: n,
            }),
        }
    }

    pub fn as_msisdn(&self) -> GtpResult<String> {
        self.expect(TlvType::Msisdn as u8)?;
        self.need(2)?;
        Ok(tbcd::decode(&self.value[1..]))
    }

    /// (ARP octet, QoS data octets).
    pub fn as_qos_profile(&self) -> GtpResult<(u8, Bytes)> {
        self.expect(TlvType::QosProfile as u8)?;
        self.need(1)?;
        Ok((self.value[0], self.value.slice(1..)))
    }

    pub fn as_rat_type(&self) -> GtpResult<u8> {
        self.expect(TlvType::RatType as u8)?;
        self.need(1)?;
        Ok(self.value[0])
    }

    pub fn as_ms_time_zone(&self) -> GtpResult<(i16, u8)> {
        self.expect(TlvType::MsTimeZone as u8)?;
        self.need(2)?;
        let tz = self.value[0];
        let quarters = ((tz & 0x07) * 10 + (tz >> 4)) as i16;
        let quarters = if tz & 0x08 != 0 { -quarters } else { quarters };
        Ok((quarters, self.value[1] & 0x03))
    }

    pub fn as_imeisv(&self) -> GtpResult<String> {
        self.expect(TlvType::Imeisv as u8)?;
        Ok(tbcd::decode(&self.value))
    }
}
