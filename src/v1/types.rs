//! GTPv1 types and constants (TS 29.060)

use crate::error::{GtpError, GtpResult};

/// Cause values occupy three bands: requests (0..=127), acceptance
/// (128..=191) and rejection (192..=255).
pub mod cause {
    pub const REQUEST_IMSI: u8 = 0;
    pub const REQUEST_ACCEPTED: u8 = 128;
    pub const NON_EXISTENT: u8 = 192;
    pub const INVALID_MESSAGE_FORMAT: u8 = 193;
    pub const IMSI_IMEI_NOT_KNOWN: u8 = 194;
    pub const VERSION_NOT_SUPPORTED: u8 = 198;
    pub const NO_RESOURCES_AVAILABLE: u8 = 199;
    pub const SERVICE_NOT_SUPPORTED: u8 = 200;
    pub const MANDATORY_IE_INCORRECT: u8 = 201;
    pub const MANDATORY_IE_MISSING: u8 = 202;
    pub const SYSTEM_FAILURE: u8 = 204;
    pub const AUTHENTICATION_FAILURE: u8 = 208;
    pub const CONTEXT_NOT_FOUND: u8 = 210;
    pub const ALL_DYNAMIC_PDP_ADDRESSES_OCCUPIED: u8 = 211;
    pub const MISSING_OR_UNKNOWN_APN: u8 = 219;
    pub const APN_ACCESS_DENIED: u8 = 222;
}

/// Whether a v1 cause value signals acceptance.
pub fn cause_is_accepted(value: u8) -> bool {
    value & 0xC0 == 0x80
}

/// Whether a v1 cause value signals rejection.
pub fn cause_is_rejected(value: u8) -> bool {
    value & 0xC0 == 0xC0
}

/// Registry keys for interface-qualified TEIDs on GTPv1 connections. These
/// never appear on the wire (v1 has no F-TEID IE); the numeric space is
/// local to the session registry and deliberately distinct from the GTPv2
/// interface-type values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InterfaceType {
    S1UEnodeb = 0,
    S1USgw = 1,
    S11MmeCPlane = 2,
    S11SgwCPlane = 3,
    S11SgwUPlane = 4,
    S5SgwCPlane = 5,
    S5PgwCPlane = 6,
    S5SgwUPlane = 7,
    S5PgwUPlane = 8,
    GnSgsnCPlane = 9,
    GnGgsnCPlane = 10,
    GnSgsnUPlane = 11,
    GnGgsnUPlane = 12,
}

/// Selection-mode values (Selection Mode TV IE)
pub mod selection_mode {
    pub const MS_OR_NETWORK_PROVIDED_APN_SUBSCRIBED_VERIFIED: u8 = 0;
    pub const MS_PROVIDED_APN_SUBSCRIPTION_NOT_VERIFIED: u8 = 1;
    pub const NETWORK_PROVIDED_APN_SUBSCRIPTION_NOT_VERIFIED: u8 = 2;
}

/// RAT type values (RAT Type TLV IE)
pub mod rat_type {
    pub const UTRAN: u8 = 1;
    pub const GERAN: u8 = 2;
    pub const WLAN: u8 = 3;
    pub const GAN: u8 = 4;
    pub const HSPA_EVOLUTION: u8 = 5;
    pub const EUTRAN: u8 = 6;
}

/// Maximum bit rate representable in the base octet (kbps).
pub const BITRATE_BASE_MAX_KBPS: u32 = 8640;

/// Maximum bit rate representable with the extension octet (kbps).
pub const BITRATE_EXT_MAX_KBPS: u32 = 256_000;

/// Encode a bit rate in kbps into the TS 24.008 QoS octet coding:
/// `(base octet, extension octet)`. The base octet covers three ranges with
/// growing granularity; 0xFE caps the base field, and rates above 8640 kbps
/// set the base to 0xFE and continue in the extension octet (the "value
/// extended" mechanism). Rates are rounded down to the nearest representable
/// step.
pub fn encode_bitrate_kbps(kbps: u32) -> (u8, Option<u8>) {
    match kbps {
        0 => (0xFF, None),
        1..=63 => (kbps as u8, None),
        64..=575 => (64 + ((kbps - 64) / 8).min(63) as u8, None),
        576..=BITRATE_BASE_MAX_KBPS => (128 + ((kbps - 576) / 64).min(126) as u8, None),
        _ => {
            let ext = match kbps {
                8641..=16_000 => 1 + (kbps.saturating_sub(8700)) / 100,
                16_001..=128_000 => 74 + (kbps - 16_000) / 1000,
                _ => 186 + ((kbps.min(BITRATE_EXT_MAX_KBPS)) - 128_000) / 2000,
            };
            (0xFE, Some(ext.min(250) as u8))
        }
    }
}

/// Decode the TS 24.008 bit-rate coding back to kbps.
pub fn decode_bitrate_kbps(base: u8, ext: Option<u8>) -> GtpResult<u32> {
    if base == 0xFF {
        return Ok(0);
    }
    if base != 0xFE {
        return Ok(match base {
            0 => return Err(GtpError::Malformed("reserved bit-rate octet 0".into())),
            1..=63 => base as u32,
            64..=127 => 64 + (base as u32 - 64) * 8,
            _ => 576 + (base as u32 - 128) * 64,
        });
    }
    match ext {
        None | Some(0) => Ok(BITRATE_BASE_MAX_KBPS),
        Some(e @ 1..=74) => Ok(8600 + e as u32 * 100),
        Some(e @ 75..=186) => Ok(16_000 + (e as u32 - 74) * 1000),
        Some(e @ 187..=250) => Ok(128_000 + (e as u32 - 186) * 2000),
        Some(e) => Err(GtpError::Malformed(format!("reserved bit-rate extension {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_bands() {
        assert!(cause_is_accepted(cause::REQUEST_ACCEPTED));
        assert!(!cause_is_accepted(cause::CONTEXT_NOT_FOUND));
        assert!(cause_is_rejected(cause::CONTEXT_NOT_FOUND));
        assert!(!cause_is_rejected(cause::REQUEST_IMSI));
    }

    #[test]
    fn test_bitrate_base_ranges_roundtrip() {
        for kbps in [1, 63, 64, 72, 560, 576, 640, 8640] {
            let (base, ext) = encode_bitrate_kbps(kbps);
            assert_eq!(ext, None, "kbps={kbps}");
            assert_eq!(decode_bitrate_kbps(base, None).unwrap(), kbps, "kbps={kbps}");
        }
    }

    #[test]
    fn test_bitrate_extended_roundtrip() {
        for kbps in [8700, 12_000, 16_000, 17_000, 128_000, 130_000, 256_000] {
            let (base, ext) = encode_bitrate_kbps(kbps);
            assert_eq!(base, 0xFE, "kbps={kbps}");
            assert!(ext.is_some());
            assert_eq!(decode_bitrate_kbps(base, ext).unwrap(), kbps, "kbps={kbps}");
        }
    }

    #[test]
    fn test_bitrate_zero() {
        let (base, ext) = encode_bitrate_kbps(0);
        assert_eq!((base, ext), (0xFF, None));
        assert_eq!(decode_bitrate_kbps(0xFF, None).unwrap(), 0);
    }

    #[test]
    fn test_bitrate_rounds_down_between_steps() {
        // 70 kbps falls between the 8-kbps steps of the middle range
        let (base, _) = encode_bitrate_kbps(70);
        assert_eq!(decode_bitrate_kbps(base, None).unwrap(), 64);
    }
}
