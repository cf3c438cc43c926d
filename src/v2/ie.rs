//! GTPv2-C information elements
//!
//! TLIV codec (`type | length | spare+instance | value`) with typed
//! constructors and accessors for the IEs this stack exchanges. Unknown IE
//! types round-trip as opaque values. Grouped IEs (Bearer Context, PDN
//! Connection) nest further IEs inside their value.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{GtpError, GtpResult};
use crate::session::QosProfile;
use crate::tbcd;
use crate::v2::types::FTeid;

/// IE header length: type(1) + length(2) + spare/instance(1)
pub const IE_HEADER_LEN: usize = 4;

/// GTPv2-C IE type values (TS 29.274 Section 8.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IeType {
    Imsi = 1,
    Cause = 2,
    Recovery = 3,
    Apn = 71,
    Ambr = 72,
    Ebi = 73,
    IpAddress = 74,
    Mei = 75,
    Msisdn = 76,
    Indication = 77,
    Pco = 78,
    Paa = 79,
    BearerQos = 80,
    FlowQos = 81,
    RatType = 82,
    ServingNetwork = 83,
    BearerTft = 84,
    Uli = 86,
    FTeid = 87,
    DelayValue = 92,
    BearerContext = 93,
    ChargingId = 94,
    ChargingCharacteristics = 95,
    BearerFlags = 97,
    PdnType = 99,
    Pti = 100,
    PdnConnection = 109,
    UeTimeZone = 114,
    PlmnId = 120,
    PortNumber = 126,
    ApnRestriction = 127,
    SelectionMode = 128,
    FqCsid = 132,
    NodeType = 135,
    Fqdn = 136,
}

impl IeType {
    /// Known IE type for a wire value, `None` for unregistered types.
    pub fn from_u8(value: u8) -> Option<Self> {
        use IeType::*;
        Some(match value {
            1 => Imsi,
            2 => Cause,
            3 => Recovery,
            71 => Apn,
            72 => Ambr,
            73 => Ebi,
            74 => IpAddress,
            75 => Mei,
            76 => Msisdn,
            77 => Indication,
            78 => Pco,
            79 => Paa,
            80 => BearerQos,
            81 => FlowQos,
            82 => RatType,
            83 => ServingNetwork,
            84 => BearerTft,
            86 => Uli,
            87 => FTeid,
            92 => DelayValue,
            93 => BearerContext,
            94 => ChargingId,
            95 => ChargingCharacteristics,
            97 => BearerFlags,
            99 => PdnType,
            100 => Pti,
            109 => PdnConnection,
            114 => UeTimeZone,
            120 => PlmnId,
            126 => PortNumber,
            127 => ApnRestriction,
            128 => SelectionMode,
            132 => FqCsid,
            135 => NodeType,
            136 => Fqdn,
            _ => return None,
        })
    }
}

/// Whether an IE type nests further IEs in its value.
pub fn is_grouped(ie_type: u8) -> bool {
    ie_type == IeType::BearerContext as u8 || ie_type == IeType::PdnConnection as u8
}

/// A single information element.
///
/// The value is kept in wire form so that any IE, known or not, round-trips
/// byte-for-byte. Typed accessors interpret the value on demand and fail
/// with [`GtpError::WrongIeType`] when called on a different IE type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ie {
    pub ie_type: u8,
    /// Instance (4 bits); distinguishes repeated IEs of one type
    pub instance: u8,
    pub value: Bytes,
}

impl Ie {
    pub fn new(ie_type: u8, instance: u8, value: Bytes) -> Self {
        Self {
            ie_type,
            instance: instance & 0x0F,
            value,
        }
    }

    pub fn from_slice(ie_type: u8, instance: u8, value: &[u8]) -> Self {
        Self::new(ie_type, instance, Bytes::copy_from_slice(value))
    }

    /// Change the instance, consuming self. Used when one message carries
    /// the same IE type more than once (e.g. sender and PGW F-TEIDs).
    pub fn with_instance(mut self, instance: u8) -> Self {
        self.instance = instance & 0x0F;
        self
    }

    pub fn encoded_len(&self) -> usize {
        IE_HEADER_LEN + self.value.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ie_type);
        buf.put_u16(self.value.len() as u16);
        buf.put_u8(self.instance & 0x0F);
        buf.put_slice(&self.value);
    }

    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < IE_HEADER_LEN {
            return Err(GtpError::BufferTooShort {
                needed: IE_HEADER_LEN,
                available: buf.remaining(),
            });
        }

        let ie_type = buf.get_u8();
        let length = buf.get_u16() as usize;
        let instance = buf.get_u8() & 0x0F;

        if buf.remaining() < length {
            return Err(GtpError::BufferTooShort {
                needed: length,
                available: buf.remaining(),
            });
        }

        Ok(Self {
            ie_type,
            instance,
            value: buf.copy_to_bytes(length),
        })
    }

    fn expect(&self, wanted: IeType) -> GtpResult<()> {
        if self.ie_type == wanted as u8 {
            Ok(())
        } else {
            Err(GtpError::WrongIeType {
                wanted: wanted as u8,
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
    pub fn imsi(digits: &str) -> GtpResult<Self> {
        Ok(Self::new(IeType::Imsi as u8, 0, tbcd::encode(digits)?.into()))
    }

    pub fn msisdn(digits: &str) -> GtpResult<Self> {
        Ok(Self::new(IeType::Msisdn as u8, 0, tbcd::encode(digits)?.into()))
    }

    /// Mobile Equipment Identity (IMEI or IMEISV digits).
    pub fn mei(digits: &str) -> GtpResult<Self> {
        Ok(Self::new(IeType::Mei as u8, 0, tbcd::encode(digits)?.into()))
    }

    pub fn cause(value: u8) -> Self {
        Self::from_slice(IeType::Cause as u8, 0, &[value, 0])
    }

    /// Cause reporting the IE that made the request fail.
    pub fn cause_with_offender(value: u8, ie_type: u8, instance: u8) -> Self {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(value);
        buf.put_u8(0);
        buf.put_u8(ie_type);
        buf.put_u16(0);
        buf.put_u8(instance & 0x0F);
        Self::new(IeType::Cause as u8, 0, buf.freeze())
    }

    pub fn recovery(restart_counter: u8) -> Self {
        Self::from_slice(IeType::Recovery as u8, 0, &[restart_counter])
    }

    /// APN in dotted notation, stored length-prefixed per label.
    pub fn apn(name: &str) -> Self {
        let mut buf = BytesMut::with_capacity(name.len() + 1);
        for label in name.split('.') {
            buf.put_u8(label.len() as u8);
            buf.put_slice(label.as_bytes());
        }
        Self::new(IeType::Apn as u8, 0, buf.freeze())
    }

    pub fn ambr(uplink_kbps: u32, downlink_kbps: u32) -> Self {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32(uplink_kbps);
        buf.put_u32(downlink_kbps);
        Self::new(IeType::Ambr as u8, 0, buf.freeze())
    }

    pub fn ebi(id: u8) -> Self {
        Self::from_slice(IeType::Ebi as u8, 0, &[id & 0x0F])
    }

    /// PDN Address Allocation carrying an IPv4 address.
    pub fn paa_v4(addr: Ipv4Addr) -> Self {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(1);
        buf.put_slice(&addr.octets());
        Self::new(IeType::Paa as u8, 0, buf.freeze())
    }

    /// PDN Address Allocation carrying an IPv6 prefix + address.
    pub fn paa_v6(prefix_len: u8, addr: Ipv6Addr) -> Self {
        let mut buf = BytesMut::with_capacity(18);
        buf.put_u8(2);
        buf.put_u8(prefix_len);
        buf.put_slice(&addr.octets());
        Self::new(IeType::Paa as u8, 0, buf.freeze())
    }

    pub fn bearer_qos(qos: &QosProfile) -> Self {
        let mut buf = BytesMut::with_capacity(22);
        let mut arp = (qos.pl & 0x0F) << 2;
        if qos.pci {
            arp |= 0x40;
        }
        if qos.pvi {
            arp |= 0x01;
        }
        buf.put_u8(arp);
        buf.put_u8(qos.qci);
        // MBR/GBR are 40-bit fields
        buf.put_slice(&qos.mbr_ul.to_be_bytes()[3..]);
        buf.put_slice(&qos.mbr_dl.to_be_bytes()[3..]);
        buf.put_slice(&qos.gbr_ul.to_be_bytes()[3..]);
        buf.put_slice(&qos.gbr_dl.to_be_bytes()[3..]);
        Self::new(IeType::BearerQos as u8, 0, buf.freeze())
    }

    pub fn rat_type(rat: u8) -> Self {
        Self::from_slice(IeType::RatType as u8, 0, &[rat])
    }

    pub fn serving_network(mcc: &str, mnc: &str) -> GtpResult<Self> {
        let plmn = tbcd::encode_plmn(mcc, mnc)?;
        Ok(Self::from_slice(IeType::ServingNetwork as u8, 0, &plmn))
    }

    pub fn fteid(fteid: &FTeid) -> Self {
        let mut buf = BytesMut::with_capacity(25);
        fteid.encode(&mut buf);
        Self::new(IeType::FTeid as u8, 0, buf.freeze())
    }

    /// Indication flags as raw octets (the flag churn across releases makes
    /// a bitfield struct a moving target; callers pass the octets).
    pub fn indication(octets: &[u8]) -> Self {
        Self::from_slice(IeType::Indication as u8, 0, octets)
    }

    pub fn pdn_type(value: u8) -> Self {
        Self::from_slice(IeType::PdnType as u8, 0, &[value & 0x07])
    }

    pub fn selection_mode(mode: u8) -> Self {
        Self::from_slice(IeType::SelectionMode as u8, 0, &[mode & 0x03])
    }

    pub fn apn_restriction(restriction: u8) -> Self {
        Self::from_slice(IeType::ApnRestriction as u8, 0, &[restriction])
    }

    /// Time zone as a quarter-hour offset from UTC (sign carried in bit 3 of
    /// the tens semi-octet) plus the daylight-saving adjustment.
    pub fn ue_time_zone(quarter_hours: i16, dst: u8) -> Self {
        let q = quarter_hours.unsigned_abs() as u8;
        let mut tz = ((q % 10) << 4) | ((q / 10) & 0x07);
        if quarter_hours < 0 {
            tz |= 0x08;
        }
        Self::from_slice(IeType::UeTimeZone as u8, 0, &[tz, dst & 0x03])
    }

    pub fn port_number(port: u16) -> Self {
        Self::from_slice(IeType::PortNumber as u8, 0, &port.to_be_bytes())
    }

    pub fn charging_id(id: u32) -> Self {
        Self::from_slice(IeType::ChargingId as u8, 0, &id.to_be_bytes())
    }

    pub fn ip_address(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::from_slice(IeType::IpAddress as u8, 0, &v4.octets()),
            IpAddr::V6(v6) => Self::from_slice(IeType::IpAddress as u8, 0, &v6.octets()),
        }
    }

    /// User Location Information: presence flags + location fields as built
    /// by the caller (TAI/ECGI/... layouts per TS 29.274 8.21).
    pub fn uli(flags: u8, data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(1 + data.len());
        buf.put_u8(flags);
        buf.put_slice(data);
        Self::new(IeType::Uli as u8, 0, buf.freeze())
    }

    /// Grouped IE from child IEs; the value is the children's wire form.
    pub fn grouped(ie_type: u8, instance: u8, children: &[Ie]) -> Self {
        let mut buf = BytesMut::with_capacity(children.iter().map(Ie::encoded_len).sum());
        for child in children {
            child.encode(&mut buf);
        }
        Self::new(ie_type, instance, buf.freeze())
    }

    pub fn bearer_context(children: &[Ie]) -> Self {
        Self::grouped(IeType::BearerContext as u8, 0, children)
    }

    pub fn pdn_connection(children: &[Ie]) -> Self {
        Self::grouped(IeType::PdnConnection as u8, 0, children)
    }
}

// Accessors.
impl Ie {
    pub fn as_imsi(&self) -> GtpResult<String> {
        self.expect(IeType::Imsi)?;
        Ok(tbcd::decode(&self.value))
    }

    pub fn as_msisdn(&self) -> GtpResult<String> {
        self.expect(IeType::Msisdn)?;
        Ok(tbcd::decode(&self.value))
    }

    pub fn as_mei(&self) -> GtpResult<String> {
        self.expect(IeType::Mei)?;
        Ok(tbcd::decode(&self.value))
    }

    pub fn as_cause(&self) -> GtpResult<u8> {
        self.expect(IeType::Cause)?;
        self.need(2)?;
        Ok(self.value[0])
    }

    pub fn as_recovery(&self) -> GtpResult<u8> {
        self.expect(IeType::Recovery)?;
        self.need(1)?;
        Ok(self.value[0])
    }

    pub fn as_apn(&self) -> GtpResult<String> {
        self.expect(IeType::Apn)?;
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

    pub fn as_ambr(&self) -> GtpResult<(u32, u32)> {
        self.expect(IeType::Ambr)?;
        self.need(8)?;
        let mut v = self.value.clone();
        Ok((v.get_u32(), v.get_u32()))
    }

    pub fn as_ebi(&self) -> GtpResult<u8> {
        self.expect(IeType::Ebi)?;
        self.need(1)?;
        Ok(self.value[0] & 0x0F)
    }

    /// The allocated UE address out of a PAA IE (either family).
    pub fn as_paa(&self) -> GtpResult<IpAddr> {
        self.expect(IeType::Paa)?;
        self.need(1)?;
        match self.value[0] & 0x07 {
            1 => {
                self.need(5)?;
                let mut o = [0u8; 4];
                o.copy_from_slice(&self.value[1..5]);
                Ok(IpAddr::V4(o.into()))
            }
            2 | 3 => {
                self.need(18)?;
                let mut o = [0u8; 16];
                o.copy_from_slice(&self.value[2..18]);
                Ok(IpAddr::V6(o.into()))
            }
            other => Err(GtpError::Malformed(format!("PDN type {other} in PAA"))),
        }
    }

    pub fn as_bearer_qos(&self) -> GtpResult<QosProfile> {
        self.expect(IeType::BearerQos)?;
        self.need(22)?;
        let v = &self.value;
        let rate = |i: usize| -> u64 {
            u64::from_be_bytes([0, 0, 0, v[i], v[i + 1], v[i + 2], v[i + 3], v[i + 4]])
        };
        Ok(QosProfile {
            pci: v[0] & 0x40 != 0,
            pl: (v[0] >> 2) & 0x0F,
            pvi: v[0] & 0x01 != 0,
            qci: v[1],
            mbr_ul: rate(2),
            mbr_dl: rate(7),
            gbr_ul: rate(12),
            gbr_dl: rate(17),
        })
    }

    pub fn as_rat_type(&self) -> GtpResult<u8> {
        self.expect(IeType::RatType)?;
        self.need(1)?;
        Ok(self.value[0])
    }

    pub fn as_serving_network(&self) -> GtpResult<(String, String)> {
        self.expect(IeType::ServingNetwork)?;
        self.need(3)?;
        Ok(tbcd::decode_plmn([self.value[0], self.value[1], self.value[2]]))
    }

    pub fn as_fteid(&self) -> GtpResult<FTeid> {
        self.expect(IeType::FTeid)?;
        FTeid::decode(&self.value)
    }

    /// The tunnel endpoint identifier carried by an F-TEID IE.
    pub fn as_teid(&self) -> GtpResult<u32> {
        Ok(self.as_fteid()?.teid)
    }

    pub fn as_pdn_type(&self) -> GtpResult<u8> {
        self.expect(IeType::PdnType)?;
        self.need(1)?;
        Ok(self.value[0] & 0x07)
    }

    pub fn as_selection_mode(&self) -> GtpResult<u8> {
        self.expect(IeType::SelectionMode)?;
        self.need(1)?;
        Ok(self.value[0] & 0x03)
    }

    pub fn as_apn_restriction(&self) -> GtpResult<u8> {
        self.expect(IeType::ApnRestriction)?;
        self.need(1)?;
        Ok(self.value[0])
    }

    /// Quarter-hour UTC offset and DST adjustment.
    pub fn as_ue_time_zone(&self) -> GtpResult<(i16, u8)> {
        self.expect(IeType::UeTimeZone)?;
        self.need(2)?;
        let tz = self.value[0];
        let quarters = ((tz & 0x07) * 10 + (tz >> 4)) as i16;
        let quarters = if tz & 0x08 != 0 { -quarters } else { quarters };
        Ok((quarters, self.value[1] & 0x03))
    }

    pub fn as_port_number(&self) -> GtpResult<u16> {
        self.expect(IeType::PortNumber)?;
        self.need(2)?;
        Ok(u16::from_be_bytes([self.value[0], self.value[1]]))
    }

    pub fn as_charging_id(&self) -> GtpResult<u32> {
        self.expect(IeType::ChargingId)?;
        self.need(4)?;
        let mut v = self.value.clone();
        Ok(v.get_u32())
    }

    /// Raw Indication flag octets.
    pub fn as_indication(&self) -> GtpResult<Bytes> {
        self.expect(IeType::Indication)?;
        Ok(self.value.clone())
    }

    /// ULI presence flags and the location fields that follow them.
    pub fn as_uli(&self) -> GtpResult<(u8, Bytes)> {
        self.expect(IeType::Uli)?;
        self.need(1)?;
        Ok((self.value[0], self.value.slice(1..)))
    }

    pub fn as_ip_address(&self) -> GtpResult<IpAddr> {
        self.expect(IeType::IpAddress)?;
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

    /// Child IEs of a grouped IE, parsed from the value.
    pub fn children(&self) -> GtpResult<Vec<Ie>> {
        if !is_grouped(self.ie_type) {
            return Err(GtpError::WrongIeType {
                wanted: IeType::BearerContext as u8,
                got: self.ie_type,
            });
        }
        let mut buf = self.value.clone();
        let mut out = Vec::new();
        while buf.has_remaining() {
            out.push(Ie::decode(&mut buf)?);
        }
        Ok(out)
    }

    /// One-step lookup of a child `(type, instance)` inside a grouped IE.
    pub fn child(&self, ie_type: u8, instance: u8) -> GtpResult<Ie> {
        self.children()?
            .into_iter()
            .find(|ie| ie.ie_type == ie_type && ie.instance == instance)
            .ok_or(GtpError::RequiredIeMissing(ie_type))
    }
}
