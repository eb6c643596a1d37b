//! CIDR collapse for address-list entries.

use ipnet::Ipv4Net;
use std::collections::BTreeSet;

use crate::address::AddressEntry;

/// Collapse entries into the minimal set of non-overlapping prefixes
/// covering exactly the same addresses.
///
/// Contained prefixes disappear into their supernets and sibling prefixes
/// merge: [8.8.8.0/25, 8.8.8.128/25] -> [8.8.8.0/24]. The result is
/// ordered by network address, so iteration order is reproducible.
pub fn collapse<'a, I>(entries: I) -> BTreeSet<AddressEntry>
where
    I: IntoIterator<Item = &'a AddressEntry>,
{
    let nets: Vec<Ipv4Net> = entries.into_iter().map(AddressEntry::net).collect();

    // Merged supernets cover only addresses of their (global) parts
    Ipv4Net::aggregate(&nets)
        .into_iter()
        .map(AddressEntry::from_valid)
        .collect()
}

/// Total number of addresses covered by a set of entries.
///
/// Only meaningful for collapsed (non-overlapping) input.
pub fn count_addresses<'a, I>(entries: I) -> u64
where
    I: IntoIterator<Item = &'a AddressEntry>,
{
    entries
        .into_iter()
        .map(AddressEntry::address_count)
        .fold(0u64, |acc, count| acc.saturating_add(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(items: &[&str]) -> Vec<AddressEntry> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn strings(set: &BTreeSet<AddressEntry>) -> Vec<String> {
        set.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_collapse_siblings() {
        let input = entries(&["8.8.8.0/25", "8.8.8.128/25"]);
        assert_eq!(strings(&collapse(&input)), vec!["8.8.8.0/24"]);
    }

    #[test]
    fn test_collapse_contained() {
        let input = entries(&["1.1.1.0/24", "1.1.1.1", "1.1.1.128/25"]);
        assert_eq!(strings(&collapse(&input)), vec!["1.1.1.0/24"]);
    }

    #[test]
    fn test_collapse_adjacent_hosts() {
        let input = entries(&["8.8.8.8", "8.8.8.9", "8.8.8.10", "8.8.8.11"]);
        assert_eq!(strings(&collapse(&input)), vec!["8.8.8.8/30"]);
    }

    #[test]
    fn test_collapse_single_host_renders_without_prefix() {
        let input = entries(&["9.9.9.9", "9.9.9.9/32"]);
        assert_eq!(strings(&collapse(&input)), vec!["9.9.9.9"]);
    }

    #[test]
    fn test_collapse_non_adjacent_kept_apart() {
        // 8.8.8.9 and 8.8.8.10 are adjacent but not siblings
        let input = entries(&["8.8.8.9", "8.8.8.10", "1.1.1.0/24"]);
        assert_eq!(
            strings(&collapse(&input)),
            vec!["1.1.1.0/24", "8.8.8.9", "8.8.8.10"]
        );
    }

    #[test]
    fn test_collapse_empty() {
        let input: Vec<AddressEntry> = vec![];
        assert!(collapse(&input).is_empty());
    }

    #[test]
    fn test_collapse_idempotent() {
        let input = entries(&["8.8.8.0/25", "8.8.8.128/25", "9.9.9.9", "1.1.1.1"]);
        let once = collapse(&input);
        assert_eq!(collapse(&once), once);
    }

    #[test]
    fn test_count_addresses() {
        let input = entries(&["8.8.8.0/24", "9.9.9.9", "1.0.0.0/8"]);
        assert_eq!(count_addresses(&input), 256 + 1 + 16_777_216);
    }
}
