//! Address value types shared by the NIC router crates.
//!
//! - [`Ipv4AddressPrefix`]: an IPv4 address together with a prefix length
//!   (`10.0.1.1/24`), with subnet mask, broadcast and membership helpers
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses

mod ip;
mod mac;

pub use ip::Ipv4AddressPrefix;
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),
}
