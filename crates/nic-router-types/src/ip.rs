//! IPv4 address+prefix type with non-failing partial parsing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

const MAX_PREFIX_LEN: u8 = 32;

/// An IPv4 address with a prefix length in CIDR notation (e.g. `10.0.1.1/24`).
///
/// Unlike a network prefix, the address keeps its host bits: a domain's
/// `interface` setting names both the router's own address and the subnet
/// it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4AddressPrefix {
    address: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4AddressPrefix {
    /// Creates a new address+prefix pair.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix_len` exceeds 32.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {}",
                prefix_len, MAX_PREFIX_LEN
            )));
        }
        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// Scans an `a.b.c.d/n` token at the start of `text`.
    ///
    /// Returns the value and the number of bytes consumed, or `None` when
    /// the text does not start with a complete address+prefix. Trailing text
    /// after the prefix digits is left unconsumed, so callers can continue
    /// with their own grammar.
    pub fn scan(text: &str) -> Option<(Self, usize)> {
        let bytes = text.as_bytes();
        let mut pos = 0;
        let mut octets = [0u8; 4];

        for (idx, octet) in octets.iter_mut().enumerate() {
            if idx > 0 {
                if bytes.get(pos) != Some(&b'.') {
                    return None;
                }
                pos += 1;
            }
            let (value, len) = scan_decimal(&bytes[pos..], 3)?;
            *octet = u8::try_from(value).ok()?;
            pos += len;
        }

        if bytes.get(pos) != Some(&b'/') {
            return None;
        }
        pos += 1;

        let (prefix_len, len) = scan_decimal(&bytes[pos..], 2)?;
        pos += len;

        let prefix_len = u8::try_from(prefix_len).ok()?;
        let value = Self::new(Ipv4Addr::from(octets), prefix_len).ok()?;
        Some((value, pos))
    }

    /// Returns the number of bytes [`scan`](Self::scan) would consume (zero on failure).
    pub fn scanned_len(text: &str) -> usize {
        Self::scan(text).map_or(0, |(_, len)| len)
    }

    /// Returns the address part.
    pub const fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns the subnet mask (`255.255.255.0` for `/24`).
    pub fn subnet_mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    /// Returns the directed broadcast address of the subnet.
    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask_bits())
    }

    /// Returns the network address (host bits cleared).
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & self.mask_bits())
    }

    /// Returns true if `ip` agrees with the address on the top `prefix_len` bits.
    pub fn prefix_matches(&self, ip: Ipv4Addr) -> bool {
        let mask = self.mask_bits();
        (u32::from(self.address) & mask) == (u32::from(ip) & mask)
    }

    fn mask_bits(&self) -> u32 {
        u32::MAX
            .checked_shl(u32::from(MAX_PREFIX_LEN - self.prefix_len))
            .unwrap_or(0)
    }
}

fn scan_decimal(bytes: &[u8], max_digits: usize) -> Option<(u32, usize)> {
    let digits = bytes
        .iter()
        .take(max_digits)
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    let value = bytes[..digits]
        .iter()
        .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0'));
    Some((value, digits))
}

impl fmt::Display for Ipv4AddressPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Ipv4AddressPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::scan(s) {
            Some((value, len)) if len == s.len() => Ok(value),
            _ => Err(ParseError::InvalidIpPrefix(s.to_string())),
        }
    }
}

impl TryFrom<String> for Ipv4AddressPrefix {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Ipv4AddressPrefix> for String {
    fn from(prefix: Ipv4AddressPrefix) -> Self {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_round_trip() {
        for text in ["10.0.1.1/24", "0.0.0.0/0", "192.168.255.254/32", "172.16.0.0/12"] {
            let prefix: Ipv4AddressPrefix = text.parse().unwrap();
            assert_eq!(prefix.to_string(), text);
        }
    }

    #[test]
    fn test_scan_leaves_trailing_text() {
        let (prefix, len) = Ipv4AddressPrefix::scan("10.0.1.1/24 via lan").unwrap();
        assert_eq!(len, 11);
        assert_eq!(prefix.prefix_len(), 24);
        assert_eq!(prefix.address(), Ipv4Addr::new(10, 0, 1, 1));
    }

    #[test]
    fn test_scan_failure_consumes_nothing() {
        for text in ["", "10.0.1.1", "10.0.1.1/", "10.0.1.1/x", "/24", "10.0.1/24", "300.0.0.1/8"] {
            assert_eq!(Ipv4AddressPrefix::scanned_len(text), 0, "{text}");
        }
    }

    #[test]
    fn test_prefix_length_limit() {
        assert!("10.0.0.0/33".parse::<Ipv4AddressPrefix>().is_err());
        assert_eq!(Ipv4AddressPrefix::scanned_len("10.0.0.0/33"), 0);
        assert!(Ipv4AddressPrefix::new(Ipv4Addr::LOCALHOST, 40).is_err());
    }

    #[test]
    fn test_from_str_rejects_trailing_text() {
        assert!("10.0.1.1/24x".parse::<Ipv4AddressPrefix>().is_err());
    }

    #[test]
    fn test_mask_and_broadcast() {
        let prefix: Ipv4AddressPrefix = "10.0.1.1/24".parse().unwrap();
        assert_eq!(prefix.subnet_mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(prefix.broadcast_address(), Ipv4Addr::new(10, 0, 1, 255));
        assert_eq!(prefix.network(), Ipv4Addr::new(10, 0, 1, 0));

        let any: Ipv4AddressPrefix = "10.0.1.1/0".parse().unwrap();
        assert_eq!(any.subnet_mask(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(any.broadcast_address(), Ipv4Addr::BROADCAST);

        let host: Ipv4AddressPrefix = "10.0.1.1/32".parse().unwrap();
        assert_eq!(host.subnet_mask(), Ipv4Addr::BROADCAST);
        assert_eq!(host.broadcast_address(), Ipv4Addr::new(10, 0, 1, 1));
    }

    #[test]
    fn test_prefix_matches() {
        let prefix: Ipv4AddressPrefix = "10.0.1.1/24".parse().unwrap();
        assert!(prefix.prefix_matches(Ipv4Addr::new(10, 0, 1, 200)));
        assert!(!prefix.prefix_matches(Ipv4Addr::new(10, 0, 2, 1)));

        let any: Ipv4AddressPrefix = "0.0.0.0/0".parse().unwrap();
        assert!(any.prefix_matches(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_serde_as_string() {
        let prefix: Ipv4AddressPrefix = serde_json::from_str("\"10.0.2.1/16\"").unwrap();
        assert_eq!(prefix.prefix_len(), 16);
        assert_eq!(serde_json::to_string(&prefix).unwrap(), "\"10.0.2.1/16\"");
        assert!(serde_json::from_str::<Ipv4AddressPrefix>("\"10.0.2.1\"").is_err());
    }
}
