//! TBCD and PLMN identity codecs
//!
//! Telephone-number IEs (IMSI, MSISDN, TID) carry swapped-nibble BCD digits,
//! low nibble first, padded with 0xF on an odd digit count (3GPP TS 29.002
//! Annex A). PLMN identities interleave MCC and MNC nibbles over 3 octets
//! with a 0xF filler nibble for 2-digit MNCs.

use crate::error::{GtpError, GtpResult};

/// Encode a decimal digit string as TBCD octets.
pub fn encode(digits: &str) -> GtpResult<Vec<u8>> {
    if digits.is_empty() {
        return Err(GtpError::Malformed("empty digit string".into()));
    }

    let mut nibbles = Vec::with_capacity(digits.len());
    for c in digits.chars() {
        let d = c
            .to_digit(10)
            .ok_or_else(|| GtpError::Malformed(format!("non-digit character {c:?}")))?;
        nibbles.push(d as u8);
    }

    let mut out = Vec::with_capacity(nibbles.len().div_ceil(2));
    for pair in nibbles.chunks(2) {
        let low = pair[0];
        let high = if pair.len() == 2 { pair[1] } else { 0x0F };
        out.push((high << 4) | low);
    }
    Ok(out)
}

/// Decode TBCD octets back to a digit string, stopping at the 0xF filler.
pub fn decode(data: &[u8]) -> String {
    let mut digits = String::with_capacity(data.len() * 2);
    for byte in data {
        let low = byte & 0x0F;
        if low == 0x0F {
            break;
        }
        digits.push(char::from(b'0' + low));

        let high = byte >> 4;
        if high == 0x0F {
            break;
        }
        digits.push(char::from(b'0' + high));
    }
    digits
}

/// Encode MCC ("001") and MNC ("01" or "001") into the 3-octet PLMN format.
///
/// MNC digit 3 occupies the high nibble of octet 2 and is 0xF when the MNC
/// has only two digits, so both widths survive a round trip.
pub fn encode_plmn(mcc: &str, mnc: &str) -> GtpResult<[u8; 3]> {
    let m = digits3(mcc, 3)?;
    if mnc.len() != 2 && mnc.len() != 3 {
        return Err(GtpError::Malformed(format!("MNC must be 2 or 3 digits, got {mnc:?}")));
    }
    let n = digits3(mnc, mnc.len())?;
    let mnc3 = if mnc.len() == 3 { n[2] } else { 0x0F };

    Ok([(m[1] << 4) | m[0], (mnc3 << 4) | m[2], (n[1] << 4) | n[0]])
}

/// Decode a 3-octet PLMN into (MCC, MNC) digit strings.
pub fn decode_plmn(bytes: [u8; 3]) -> (String, String) {
    let mcc = [bytes[0] & 0x0F, bytes[0] >> 4, bytes[1] & 0x0F];
    let mnc3 = bytes[1] >> 4;
    let mnc12 = [bytes[2] & 0x0F, bytes[2] >> 4];

    let mcc: String = mcc.iter().map(|d| char::from(b'0' + d)).collect();
    let mut mnc: String = mnc12.iter().map(|d| char::from(b'0' + d)).collect();
    if mnc3 != 0x0F {
        mnc.push(char::from(b'0' + mnc3));
    }
    (mcc, mnc)
}

fn digits3(s: &str, want: usize) -> GtpResult<[u8; 3]> {
    if s.len() != want {
        return Err(GtpError::Malformed(format!("expected {want} digits, got {s:?}")));
    }
    let mut out = [0u8; 3];
    for (i, c) in s.chars().enumerate() {
        out[i] = c
            .to_digit(10)
            .ok_or_else(|| GtpError::Malformed(format!("non-digit character {c:?}")))? as u8;
    }
    Ok(out)
}
