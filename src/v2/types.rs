//! GTPv2-C types and constants (TS 29.274)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use crate::error::{GtpError, GtpResult};

/// Cause values (TS 29.274 Section 8.4, the subset this stack emits or
/// inspects). Any u8 survives on the wire; this enum names the known ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cause {
    LocalDetach = 2,
    CompleteDetach = 3,
    IsrDeactivation = 5,
    ErrorIndicationReceived = 6,
    NetworkFailure = 13,
    RequestAccepted = 16,
    RequestAcceptedPartially = 17,
    NewPdnTypeDueToNetworkPreference = 18,
    ContextNotFound = 64,
    InvalidMessageFormat = 65,
    VersionNotSupportedByNextPeer = 66,
    InvalidLength = 67,
    ServiceNotSupported = 68,
    MandatoryIeIncorrect = 69,
    MandatoryIeMissing = 70,
    SystemFailure = 72,
    NoResourcesAvailable = 73,
    MissingOrUnknownApn = 78,
    AllDynamicAddressesAreOccupied = 84,
    UeNotResponding = 87,
    ServiceDenied = 89,
    NoMemoryAvailable = 91,
    UserAuthenticationFailed = 92,
    RequestRejected = 94,
    ImsiImeiNotKnown = 96,
    ConditionalIeMissing = 103,
    RemotePeerNotResponding = 100,
    InvalidReplyFromRemotePeer = 107,
    FallbackToGtpv1 = 108,
    InvalidPeer = 109,
    ApnCongestion = 113,
    TimedOutRequest = 122,
}

/// Whether a cause value signals acceptance (16..=63 band).
pub fn cause_is_accepted(value: u8) -> bool {
    (16..=63).contains(&value)
}

/// F-TEID interface types (TS 29.274 Section 8.22)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InterfaceType {
    S1uEnodebGtpU = 0,
    S1uSgwGtpU = 1,
    S12RncGtpU = 2,
    S12SgwGtpU = 3,
    S5S8SgwGtpU = 4,
    S5S8PgwGtpU = 5,
    S5S8SgwGtpC = 6,
    S5S8PgwGtpC = 7,
    S11MmeGtpC = 10,
    S11S4SgwGtpC = 11,
    S10MmeGtpC = 12,
    S3MmeGtpC = 13,
    S3SgsnGtpC = 14,
    S4SgsnGtpU = 15,
    S4SgwGtpU = 16,
    S4SgsnGtpC = 17,
    S2bEpdgGtpC = 30,
    S2bUEpdgGtpU = 31,
    S2bPgwGtpC = 32,
    S2bUPgwGtpU = 33,
    S11MmeGtpU = 38,
    S11SgwGtpU = 39,
}

impl InterfaceType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use InterfaceType::*;
        Some(match value {
            0 => S1uEnodebGtpU,
            1 => S1uSgwGtpU,
            2 => S12RncGtpU,
            3 => S12SgwGtpU,
            4 => S5S8SgwGtpU,
            5 => S5S8PgwGtpU,
            6 => S5S8SgwGtpC,
            7 => S5S8PgwGtpC,
            10 => S11MmeGtpC,
            11 => S11S4SgwGtpC,
            12 => S10MmeGtpC,
            13 => S3MmeGtpC,
            14 => S3SgsnGtpC,
            15 => S4SgsnGtpU,
            16 => S4SgwGtpU,
            17 => S4SgsnGtpC,
            30 => S2bEpdgGtpC,
            31 => S2bUEpdgGtpU,
            32 => S2bPgwGtpC,
            33 => S2bUPgwGtpU,
            38 => S11MmeGtpU,
            39 => S11SgwGtpU,
            _ => return None,
        })
    }
}

/// RAT type values carried in the RAT Type IE
pub mod rat_type {
    pub const UTRAN: u8 = 1;
    pub const GERAN: u8 = 2;
    pub const WLAN: u8 = 3;
    pub const GAN: u8 = 4;
    pub const HSPA_EVOLUTION: u8 = 5;
    pub const EUTRAN: u8 = 6;
    pub const NR: u8 = 10;
}

/// PDN type values (PAA / PDN Type IEs)
pub mod pdn_type {
    pub const IPV4: u8 = 1;
    pub const IPV6: u8 = 2;
    pub const IPV4V6: u8 = 3;
    pub const NON_IP: u8 = 4;
}

/// Selection-mode values
pub mod selection_mode {
    pub const MS_OR_NETWORK_PROVIDED_APN_SUBSCRIBED_VERIFIED: u8 = 0;
    pub const MS_PROVIDED_APN_SUBSCRIPTION_NOT_VERIFIED: u8 = 1;
    pub const NETWORK_PROVIDED_APN_SUBSCRIPTION_NOT_VERIFIED: u8 = 2;
}

/// APN-restriction values
pub mod apn_restriction {
    pub const NO_EXISTING_CONTEXTS_OR_RESTRICTION: u8 = 0;
    pub const PUBLIC_1: u8 = 1;
    pub const PUBLIC_2: u8 = 2;
    pub const PRIVATE_1: u8 = 3;
    pub const PRIVATE_2: u8 = 4;
}

/// Fully Qualified TEID: (interface type, TEID, address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FTeid {
    pub interface_type: u8,
    pub teid: u32,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl FTeid {
    pub fn new(interface_type: InterfaceType, teid: u32, addr: IpAddr) -> Self {
        let (ipv4, ipv6) = match addr {
            IpAddr::V4(v4) => (Some(v4), None),
            IpAddr::V6(v6) => (None, Some(v6)),
        };
        Self {
            interface_type: interface_type as u8,
            teid,
            ipv4,
            ipv6,
        }
    }

    pub fn addr(&self) -> Option<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .or_else(|| self.ipv6.map(IpAddr::V6))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = self.interface_type & 0x3F;
        if self.ipv4.is_some() {
            flags |= 0x80;
        }
        if self.ipv6.is_some() {
            flags |= 0x40;
        }
        buf.put_u8(flags);
        buf.put_u32(self.teid);
        if let Some(v4) = self.ipv4 {
            buf.put_slice(&v4.octets());
        }
        if let Some(v6) = self.ipv6 {
            buf.put_slice(&v6.octets());
        }
    }

    pub fn decode(value: &[u8]) -> GtpResult<Self> {
        if value.len() < 5 {
            return Err(GtpError::BufferTooShort {
                needed: 5,
                available: value.len(),
            });
        }

        let flags = value[0];
        let teid = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);
        let mut offset = 5;

        let ipv4 = if flags & 0x80 != 0 {
            if value.len() < offset + 4 {
                return Err(GtpError::BufferTooShort {
                    needed: offset + 4,
                    available: value.len(),
                });
            }
            let mut o = [0u8; 4];
            o.copy_from_slice(&value[offset..offset + 4]);
            offset += 4;
            Some(Ipv4Addr::from(o))
        } else {
            None
        };

        let ipv6 = if flags & 0x40 != 0 {
            if value.len() < offset + 16 {
                return Err(GtpError::BufferTooShort {
                    needed: offset + 16,
                    available: value.len(),
                });
            }
            let mut o = [0u8; 16];
            o.copy_from_slice(&value[offset..offset + 16]);
            Some(Ipv6Addr::from(o))
        } else {
            None
        };

        Ok(Self {
            interface_type: flags & 0x3F,
            teid,
            ipv4,
            ipv6,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fteid_roundtrip_v4() {
        let fteid = FTeid::new(
            InterfaceType::S11MmeGtpC,
            0x1234_5678,
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1)),
        );
        let mut buf = BytesMut::new();
        fteid.encode(&mut buf);
        assert_eq!(buf.len(), 9);
        assert_eq!(buf[0], 0x80 | 10);

        let decoded = FTeid::decode(&buf).unwrap();
        assert_eq!(decoded, fteid);
    }

    #[test]
    fn test_fteid_roundtrip_v6() {
        let fteid = FTeid::new(
            InterfaceType::S5S8PgwGtpU,
            7,
            IpAddr::V6(Ipv6Addr::LOCALHOST),
        );
        let mut buf = BytesMut::new();
        fteid.encode(&mut buf);
        assert_eq!(buf.len(), 21);

        let decoded = FTeid::decode(&buf).unwrap();
        assert_eq!(decoded.ipv6, Some(Ipv6Addr::LOCALHOST));
        assert_eq!(decoded.ipv4, None);
    }

    #[test]
    fn test_fteid_truncated() {
        assert!(FTeid::decode(&[0x80, 0, 0, 0, 1, 10, 0]).is_err());
    }

    #[test]
    fn test_cause_bands() {
        assert!(cause_is_accepted(Cause::RequestAccepted as u8));
        assert!(cause_is_accepted(Cause::RequestAcceptedPartially as u8));
        assert!(!cause_is_accepted(Cause::ContextNotFound as u8));
        assert!(!cause_is_accepted(0));
    }
}
