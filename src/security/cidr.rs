//! IPv4 CIDR matching for the trusted-source bypass.
//!
//! # Responsibilities
//! - Parse CIDR strings into masked network blocks
//! - Test client addresses against the trusted range set
//! - Hold the process-wide range set behind an atomically swappable pointer
//!
//! # Design Decisions
//! - Matching never fails: an unparseable address is simply untrusted
//! - Malformed range entries are skipped with a warning, never fatal
//! - Readers never lock; a refresh replaces the whole set at once

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ipnet::Ipv4Net;
use thiserror::Error;

/// A range entry that could not be turned into a [`CidrBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRangeError {
    /// Not an address or `address/prefix` pair.
    #[error("invalid CIDR block '{0}'")]
    Syntax(String),

    /// Prefix length outside 0..=32.
    #[error("prefix length {0} out of range (0-32)")]
    PrefixLength(u8),

    /// A well-formed IPv6 range; only IPv4 is matched.
    #[error("'{0}' is not an IPv4 range")]
    NotIpv4(String),
}

/// A request address that is not a valid IPv4 (or IPv4-mapped IPv6) address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed client address '{0}'")]
pub struct MalformedClientAddress(pub String);

/// An IPv4 network prefix with its base address already masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrBlock(Ipv4Net);

impl CidrBlock {
    /// Build a block, masking `base` down to `prefix_len` bits.
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self, MalformedRangeError> {
        Ipv4Net::new(base, prefix_len)
            .map(|net| Self(net.trunc()))
            .map_err(|_| MalformedRangeError::PrefixLength(prefix_len))
    }

    /// Masked network address.
    pub fn base(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// True when the top `prefix_len` bits of `addr` equal those of the base.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.0.contains(&addr)
    }
}

impl FromStr for CidrBlock {
    type Err = MalformedRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let base = match addr.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4,
            Ok(IpAddr::V6(_)) => return Err(MalformedRangeError::NotIpv4(s.to_string())),
            Err(_) => return Err(MalformedRangeError::Syntax(s.to_string())),
        };

        // A bare address is a single-host block
        let prefix_len = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| MalformedRangeError::Syntax(s.to_string()))?,
            None => 32,
        };

        Self::new(base, prefix_len)
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a client address as IPv4, unwrapping IPv4-mapped IPv6 (`::ffff:a.b.c.d`).
pub fn parse_client_ip(ip: &str) -> Result<Ipv4Addr, MalformedClientAddress> {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ok(v4),
        Ok(IpAddr::V6(v6)) => v6
            .to_ipv4_mapped()
            .ok_or_else(|| MalformedClientAddress(ip.to_string())),
        Err(_) => Err(MalformedClientAddress(ip.to_string())),
    }
}

/// Check whether `ip` falls inside any of `ranges`.
///
/// Returns false for malformed input and for an empty range set.
pub fn is_trusted(ip: &str, ranges: &[CidrBlock]) -> bool {
    let Ok(addr) = parse_client_ip(ip) else {
        return false;
    };
    ranges.iter().any(|block| block.contains(addr))
}

/// Parse a list of range strings, skipping (and logging) entries that fail.
pub fn parse_ranges<I, S>(entries: I) -> Vec<CidrBlock>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut blocks = Vec::new();
    for entry in entries {
        let entry = entry.as_ref();
        match entry.parse::<CidrBlock>() {
            Ok(block) => blocks.push(block),
            Err(MalformedRangeError::NotIpv4(_)) => {
                tracing::debug!(range = %entry, "Skipping non-IPv4 range");
            }
            Err(e) => {
                tracing::warn!(range = %entry, error = %e, "Skipping malformed trusted range");
            }
        }
    }
    blocks
}

/// Process-wide trusted range set.
///
/// Cloning shares the same underlying set. Lookups are lock-free; `replace`
/// swaps in a new immutable snapshot.
#[derive(Clone)]
pub struct TrustedRanges {
    inner: Arc<ArcSwap<Vec<CidrBlock>>>,
}

impl TrustedRanges {
    pub fn new(blocks: Vec<CidrBlock>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(blocks)),
        }
    }

    /// A set that trusts nothing, so every request is counted.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Whether `ip` lies inside any currently loaded block.
    pub fn contains(&self, ip: &str) -> bool {
        is_trusted(ip, &self.inner.load())
    }

    /// Swap in a new set.
    pub fn replace(&self, blocks: Vec<CidrBlock>) {
        self.inner.store(Arc::new(blocks));
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Vec<CidrBlock>> {
        self.inner.load_full()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}

impl Default for TrustedRanges {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for TrustedRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.load().iter()).finish()
    }
}
