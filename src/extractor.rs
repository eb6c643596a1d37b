//! Extraction of IPv4 addresses and prefixes from free-form text.
//!
//! Feeds come in every shape (plain lists, CSV, JSON, HTML, router CLI
//! output), so nothing is parsed structurally. The text is scanned for
//! dotted-quad tokens with an optional `/len` suffix, and every candidate
//! that survives validation becomes an [`AddressEntry`].

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::address::AddressEntry;

/// Longest run of digits accepted as a prefix length.
const MAX_PREFIX_DIGITS: usize = 2;

/// A dotted quad with an optional `/len`.
///
/// The leading group stands in for a word boundary: a token may not
/// continue a word, a number or a dotted sequence. `overflow` catches a
/// fourth digit on the last octet, which disqualifies the whole token.
static CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[^0-9A-Za-z.])(?P<addr>[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3})(?P<overflow>[0-9]?)(?:/(?P<len>[0-9]+))?",
    )
    .expect("candidate pattern is valid")
});

/// Extract validated entries in first-match order.
///
/// Duplicates are kept. Candidates that are malformed, have host bits set
/// or are not globally routable are dropped silently.
pub fn extract_addresses(text: &str) -> Vec<AddressEntry> {
    scan_candidates(text)
        .into_iter()
        .filter_map(|candidate| match candidate.parse::<AddressEntry>() {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!("Dropped candidate: {}", e);
                None
            }
        })
        .collect()
}

/// Find every token shaped like `d.d.d.d` or `d.d.d.d/p`.
///
/// Shape only: octet values and prefix lengths are not range-checked here.
/// A slash followed by more than two digits discards the token.
pub fn scan_candidates(text: &str) -> Vec<&str> {
    CANDIDATE
        .captures_iter(text)
        .filter_map(|caps| {
            let addr = caps.name("addr")?;
            if caps.name("overflow").is_some_and(|m| !m.as_str().is_empty()) {
                return None;
            }
            if caps
                .name("len")
                .is_some_and(|len| len.as_str().len() > MAX_PREFIX_DIGITS)
            {
                return None;
            }
            let end = caps.get(0).map_or(addr.end(), |whole| whole.end());
            Some(&text[addr.start()..end])
        })
        .collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Scanning arbitrary text never panics and is deterministic
        #[test]
        fn prop_extract_deterministic(text in ".{0,200}") {
            let first = extract_addresses(&text);
            let second = extract_addresses(&text);
            prop_assert_eq!(first, second);
        }

        /// Every extracted entry is globally routable
        #[test]
        fn prop_extracted_entries_are_global(
            octets in prop::collection::vec((0u8..=255, 0u8..=255, 0u8..=255, 0u8..=255), 0..20)
        ) {
            let text = octets
                .iter()
                .map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d))
                .collect::<Vec<_>>()
                .join(" ");
            for entry in extract_addresses(&text) {
                prop_assert!(crate::address::is_globally_routable(&entry.net()));
            }
        }

        /// A lone valid address surrounded by separators is always found
        #[test]
        fn prop_single_address_found(a in 1u8..=9, b: u8, c: u8, d: u8) {
            let text = format!("# header\n{}.{}.{}.{}\n", a, b, c, d);
            prop_assert_eq!(scan_candidates(&text).len(), 1);
        }
    }
}
