//! Canonical address-list entries.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// IPv4 ranges that are never globally routable unicast space.
///
/// Based on the IANA special-purpose registry, plus multicast and the
/// reserved class E block.
const NON_GLOBAL_V4: &[([u8; 4], u8)] = &[
    ([0, 0, 0, 0], 8),       // "this" network
    ([10, 0, 0, 0], 8),      // private
    ([100, 64, 0, 0], 10),   // shared address space (CGN)
    ([127, 0, 0, 0], 8),     // loopback
    ([169, 254, 0, 0], 16),  // link-local
    ([172, 16, 0, 0], 12),   // private
    ([192, 0, 0, 0], 24),    // IETF protocol assignments
    ([192, 0, 2, 0], 24),    // TEST-NET-1
    ([192, 168, 0, 0], 16),  // private
    ([198, 18, 0, 0], 15),   // benchmarking
    ([198, 51, 100, 0], 24), // TEST-NET-2
    ([203, 0, 113, 0], 24),  // TEST-NET-3
    ([224, 0, 0, 0], 4),     // multicast
    ([240, 0, 0, 0], 4),     // reserved, includes limited broadcast
];

fn non_global_ranges() -> impl Iterator<Item = Ipv4Net> {
    NON_GLOBAL_V4
        .iter()
        .filter_map(|(octets, len)| Ipv4Net::new(Ipv4Addr::from(*octets), *len).ok())
}

/// Check that a network lies entirely in globally routable unicast space.
///
/// A network is rejected when it overlaps any special-purpose range, in
/// either direction: `10.1.0.0/16` sits inside a private block and
/// `8.0.0.0/5` swallows one.
pub fn is_globally_routable(net: &Ipv4Net) -> bool {
    !non_global_ranges().any(|reserved| reserved.contains(net) || net.contains(&reserved))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("not an IPv4 address or prefix: {0}")]
    Malformed(String),

    #[error("prefix has host bits set: {0}")]
    HostBitsSet(String),

    #[error("not globally routable: {0}")]
    NotGlobal(String),
}

/// One globally routable IPv4 address or prefix.
///
/// Displays the way RouterOS does: single addresses without `/32`,
/// prefixes with `/N`. Two entries are equal exactly when their canonical
/// strings are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressEntry(Ipv4Net);

impl AddressEntry {
    /// Validate a network as an address-list entry.
    pub fn new(net: Ipv4Net) -> Result<Self, AddressError> {
        if net.trunc() != net {
            return Err(AddressError::HostBitsSet(net.to_string()));
        }
        if !is_globally_routable(&net) {
            return Err(AddressError::NotGlobal(net.to_string()));
        }
        Ok(Self(net))
    }

    /// Wrap a network already known to be truncated and global.
    ///
    /// Used for supernets built by merging valid entries, which inherit
    /// both properties from their parts.
    pub(crate) fn from_valid(net: Ipv4Net) -> Self {
        debug_assert!(net.trunc() == net && is_globally_routable(&net));
        Self(net)
    }

    pub fn net(&self) -> Ipv4Net {
        self.0
    }

    /// True for a single address (`/32`).
    pub fn is_host(&self) -> bool {
        self.0.prefix_len() == 32
    }

    /// Number of addresses covered by this entry.
    pub fn address_count(&self) -> u64 {
        1u64 << (32 - u32::from(self.0.prefix_len()))
    }
}

impl FromStr for AddressEntry {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let net = if s.contains('/') {
            s.parse::<Ipv4Net>()
                .map_err(|_| AddressError::Malformed(s.to_string()))?
        } else {
            let addr = s
                .parse::<Ipv4Addr>()
                .map_err(|_| AddressError::Malformed(s.to_string()))?;
            Ipv4Net::from(addr)
        };
        Self::new(net)
    }
}

impl fmt::Display for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "{}", self.0.addr())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(s: &str) -> AddressEntry {
        s.parse().unwrap()
    }

    #[test]
    fn test_display_host_without_prefix() {
        assert_eq!(entry("8.8.8.8").to_string(), "8.8.8.8");
        assert_eq!(entry("8.8.8.8/32").to_string(), "8.8.8.8");
        assert_eq!(entry("8.8.8.0/24").to_string(), "8.8.8.0/24");
    }

    #[test]
    fn test_host_and_slash32_are_equal() {
        assert_eq!(entry("1.1.1.1"), entry("1.1.1.1/32"));
    }

    #[test]
    fn test_rejects_private_and_special() {
        for s in [
            "10.0.0.5",
            "127.0.0.1",
            "169.254.1.1",
            "172.16.5.4",
            "192.168.1.1",
            "100.64.0.1",
            "224.0.0.1",
            "239.255.255.250",
            "255.255.255.255",
            "0.0.0.0",
            "192.0.2.10",
            "203.0.113.0/24",
        ] {
            assert!(
                matches!(s.parse::<AddressEntry>(), Err(AddressError::NotGlobal(_))),
                "{} should be rejected",
                s
            );
        }
    }

    #[test]
    fn test_rejects_supernet_of_reserved_block() {
        assert!(matches!(
            "8.0.0.0/5".parse::<AddressEntry>(),
            Err(AddressError::NotGlobal(_))
        ));
        assert!(matches!(
            "0.0.0.0/0".parse::<AddressEntry>(),
            Err(AddressError::NotGlobal(_))
        ));
    }

    #[test]
    fn test_rejects_host_bits() {
        assert!(matches!(
            "8.8.8.8/24".parse::<AddressEntry>(),
            Err(AddressError::HostBitsSet(_))
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        for s in ["", "8.8.8", "256.1.1.1", "8.8.8.8/33", "01.2.3.4", "::1", "host"] {
            assert!(
                matches!(s.parse::<AddressEntry>(), Err(AddressError::Malformed(_))),
                "{} should be malformed",
                s
            );
        }
    }

    #[test]
    fn test_address_count() {
        assert_eq!(entry("8.8.8.8").address_count(), 1);
        assert_eq!(entry("8.8.8.0/24").address_count(), 256);
        assert_eq!(entry("1.0.0.0/8").address_count(), 16_777_216);
    }

    #[test]
    fn test_global_edges() {
        assert!(is_globally_routable(&"11.0.0.0/8".parse().unwrap()));
        assert!(is_globally_routable(&"223.255.255.0/24".parse().unwrap()));
        assert!(!is_globally_routable(&"172.0.0.0/8".parse().unwrap()));
    }
}
