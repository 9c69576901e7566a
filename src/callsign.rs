/*! Callsign and AX.25 address field encoding.

Each address field octet is a source callsign character shifted left one
bit, space-padded to six characters, followed by an SSID octet carrying
the SSID, the command/response bit (source and destination addresses) or
has-been-repeated bit (digipeater addresses), and the address-field
extension bit marking the last octet of the address field.
*/

use crate::error::{Error, Result};

/// Maximum callsign length, not counting the SSID.
pub const CALLSIGN_LEN: usize = 6;

/// One decoded AX.25 address: a callsign, an SSID, and the flag bits
/// carried in its SSID octet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Callsign, uppercased, without trailing padding.
    pub callsign: String,
    /// SSID, 0-15.
    pub ssid: u8,
    /// Command/response bit for source and destination addresses, or
    /// the has-been-repeated bit for a digipeater address.
    pub c_or_h_bit: bool,
}

impl Address {
    /// Build an address, validating the callsign length and SSID range.
    pub fn new(callsign: &str, ssid: u8, c_or_h_bit: bool) -> Result<Self> {
        if callsign.is_empty() || callsign.len() > CALLSIGN_LEN {
            return Err(Error::InvalidArgument(format!(
                "callsign '{callsign}' must be 1-{CALLSIGN_LEN} characters"
            )));
        }
        if ssid > 15 {
            return Err(Error::InvalidArgument(format!(
                "ssid {ssid} exceeds the 4-bit field"
            )));
        }
        if !callsign.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidArgument(format!(
                "callsign '{callsign}' must be alphanumeric"
            )));
        }
        Ok(Self {
            callsign: callsign.to_ascii_uppercase(),
            ssid,
            c_or_h_bit,
        })
    }

    /// Encode into the 7-octet address field form. `last` sets the
    /// address-field extension bit (bit 0 of the SSID octet).
    pub fn encode(&self, last: bool) -> [u8; 7] {
        let mut out = [0u8; 7];
        let padded = format!("{:<width$}", self.callsign, width = CALLSIGN_LEN);
        for (i, ch) in padded.bytes().take(CALLSIGN_LEN).enumerate() {
            out[i] = ch << 1;
        }
        let mut ssid_octet = 0x60 | (self.ssid << 1);
        if last {
            ssid_octet |= 0x01;
        }
        if self.c_or_h_bit {
            ssid_octet |= 0x80;
        }
        out[6] = ssid_octet;
        out
    }

    /// Decode a 7-octet address field entry. Returns the address and
    /// whether its extension bit was set (i.e. it was the last address
    /// field octet).
    pub fn decode(bytes: &[u8; 7]) -> Result<(Self, bool)> {
        let mut chars = [0u8; CALLSIGN_LEN];
        for (i, b) in bytes[..CALLSIGN_LEN].iter().enumerate() {
            chars[i] = b >> 1;
        }
        let callsign = std::str::from_utf8(&chars)
            .map_err(|_| Error::InvalidArgument("non-UTF8 callsign octets".into()))?
            .trim_end()
            .to_string();
        if callsign.is_empty() {
            return Err(Error::InvalidArgument("empty callsign in address field".into()));
        }
        let ssid_octet = bytes[6];
        let ssid = (ssid_octet >> 1) & 0x0F;
        let c_or_h_bit = ssid_octet & 0x80 != 0;
        let last = ssid_octet & 0x01 != 0;
        Ok((
            Self {
                callsign,
                ssid,
                c_or_h_bit,
            },
            last,
        ))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.callsign)
        } else {
            write!(f, "{}-{}", self.callsign, self.ssid)
        }
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    /// Parse `CALL` or `CALL-SSID` textual form.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('-') {
            Some((call, ssid)) => {
                let ssid: u8 = ssid
                    .parse()
                    .map_err(|_| Error::InvalidArgument(format!("bad ssid in '{s}'")))?;
                Address::new(call, ssid, false)
            }
            None => Address::new(s, 0, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_ssid_and_flags() {
        let addr = Address::new("N0CALL", 7, true).unwrap();
        let encoded = addr.encode(true);
        let (decoded, last) = Address::decode(&encoded).unwrap();
        assert_eq!(decoded, addr);
        assert!(last);
    }

    #[test]
    fn padding_is_spaces_shifted() {
        let addr = Address::new("AB", 0, false).unwrap();
        let encoded = addr.encode(false);
        // 'A' << 1, 'B' << 1, then four shifted spaces.
        assert_eq!(encoded[0], b'A' << 1);
        assert_eq!(encoded[1], b'B' << 1);
        assert_eq!(encoded[2], b' ' << 1);
        assert_eq!(encoded[6] & 0x01, 0);
    }

    #[test]
    fn display_omits_zero_ssid() {
        let addr = Address::new("N0CALL", 0, false).unwrap();
        assert_eq!(addr.to_string(), "N0CALL");
        let addr = Address::new("N0CALL", 5, false).unwrap();
        assert_eq!(addr.to_string(), "N0CALL-5");
    }

    #[test]
    fn parse_from_str() {
        let addr: Address = "KI5ABC-3".parse().unwrap();
        assert_eq!(addr.callsign, "KI5ABC");
        assert_eq!(addr.ssid, 3);
    }

    #[test]
    fn rejects_oversize_callsign_and_ssid() {
        assert!(Address::new("TOOLONGG", 0, false).is_err());
        assert!(Address::new("N0CALL", 16, false).is_err());
    }
}
