//! The external address value
//!
//! An [`ExternalAddress`] is parsed once into its binary form. Equality, hashing
//! and the persisted representation all go through that form, so two textual
//! spellings of the same address (`2001:0db8::1` and `2001:db8::1`) are the
//! same value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::ProbeError;

/// A validated, canonical IPv4 or IPv6 address
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are folded into their IPv4
/// form so a provider that switches between the two spellings does not look
/// like an address change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "IpAddr", from = "IpAddr")]
pub struct ExternalAddress(IpAddr);

impl ExternalAddress {
    /// Wrap an address, canonicalising IPv4-mapped IPv6
    pub fn new(ip: IpAddr) -> Self {
        Self(ip.to_canonical())
    }

    /// Parse a textual address, ignoring surrounding whitespace
    pub fn parse(text: &str) -> Result<Self, ProbeError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ProbeError::EmptyResponse);
        }
        trimmed
            .parse::<IpAddr>()
            .map(Self::new)
            .map_err(|_| ProbeError::Unparseable(trimmed.to_string()))
    }

    /// The underlying address
    pub fn ip(&self) -> IpAddr {
        self.0
    }

    pub fn is_ipv4(&self) -> bool {
        self.0.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.0.is_ipv6()
    }
}

impl From<IpAddr> for ExternalAddress {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip)
    }
}

impl From<ExternalAddress> for IpAddr {
    fn from(addr: ExternalAddress) -> Self {
        addr.0
    }
}

impl FromStr for ExternalAddress {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ExternalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
