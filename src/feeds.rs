//! Feed specification parsing.
//!
//! A feed specification is a comma-separated list of tokens. Tokens of the
//! form `AS<digits>` (case-insensitive, 1 to 10 digits) name an Autonomous
//! System whose originated prefixes are looked up in a routing registry;
//! every other non-empty token is treated as a URL.

use std::fmt;
use std::str::FromStr;

/// Maximum number of digits accepted after the `AS` prefix.
const MAX_ASN_DIGITS: usize = 10;

/// Autonomous System Number.
///
/// Stored as `u64` since the token grammar allows ten digits, which can
/// exceed the 32-bit ASN space. The registry decides whether it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Asn(u64);

impl Asn {
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn number(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl FromStr for Asn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid ASN '{}': expected AS followed by 1-10 digits", s);

        let prefix = s.get(..2).ok_or_else(invalid)?;
        if !prefix.eq_ignore_ascii_case("as") {
            return Err(invalid());
        }

        let digits = &s[2..];
        if digits.is_empty()
            || digits.len() > MAX_ASN_DIGITS
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        digits.parse::<u64>().map(Asn).map_err(|_| invalid())
    }
}

/// A single feed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    Url(String),
    Asn(Asn),
}

impl FeedSource {
    /// Classify one token. Returns `None` for blank tokens.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        match token.parse::<Asn>() {
            Ok(asn) => Some(FeedSource::Asn(asn)),
            Err(_) => Some(FeedSource::Url(token.to_string())),
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedSource::Url(url) => f.write_str(url),
            FeedSource::Asn(asn) => write!(f, "{}", asn),
        }
    }
}

/// Feed specification split by source kind, in specification order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFeeds {
    pub asns: Vec<Asn>,
    pub urls: Vec<String>,
}

impl ResolvedFeeds {
    pub fn is_empty(&self) -> bool {
        self.asns.is_empty() && self.urls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.asns.len() + self.urls.len()
    }
}

/// Split a feed specification into ASNs and URLs. Empty tokens are dropped.
pub fn resolve_feeds(spec: &str) -> ResolvedFeeds {
    let mut resolved = ResolvedFeeds::default();
    for source in spec.split(',').filter_map(FeedSource::parse) {
        match source {
            FeedSource::Asn(asn) => resolved.asns.push(asn),
            FeedSource::Url(url) => resolved.urls.push(url),
        }
    }
    resolved
}
