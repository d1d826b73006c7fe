//! Capability URIs and ordered capability sets.
//!
//! A session negotiates a set of capabilities at handshake time and a device
//! module declares the capabilities it participates in. Dispatch eligibility
//! hinges on the two sets intersecting, so comparison is done on the URI
//! without its query part: `urn:example:foo?revision=2024-01-01` and
//! `urn:example:foo` name the same capability.

use serde::{Deserialize, Serialize};

/// NETCONF 1.0 base capability.
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// NETCONF 1.1 base capability.
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// Event notification capability (RFC 5277).
pub const NOTIFICATION_1_0: &str = "urn:ietf:params:netconf:capability:notification:1.0";
/// Interleave capability (RFC 5277).
pub const INTERLEAVE_1_0: &str = "urn:ietf:params:netconf:capability:interleave:1.0";

/// Capabilities every server advertises regardless of loaded modules.
pub const SERVER_BASE_CAPABILITIES: [&str; 4] = [BASE_1_0, BASE_1_1, NOTIFICATION_1_0, INTERLEAVE_1_0];

/// Insertion-ordered set of capability URIs.
///
/// # Example
///
/// ```
/// use netconfd_modules::CapabilitySet;
///
/// let session: CapabilitySet = ["urn:a", "urn:b?revision=1"].into_iter().collect();
/// let module: CapabilitySet = ["urn:b"].into_iter().collect();
/// assert!(session.intersects(&module));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CapabilitySet {
    uris: Vec<String>,
}

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { uris: Vec::new() }
    }

    /// Adds a capability, returning `false` when it was already present or
    /// blank.
    pub fn insert(&mut self, uri: impl Into<String>) -> bool {
        let uri = uri.into();
        let trimmed = uri.trim();
        if trimmed.is_empty() || self.contains(trimmed) {
            return false;
        }
        self.uris.push(trimmed.to_owned());
        true
    }

    /// Reports whether the set holds `uri`, ignoring query parameters.
    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        let wanted = base_uri(uri);
        self.uris.iter().any(|held| base_uri(held) == wanted)
    }

    /// Reports whether the two sets share at least one capability.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.uris.iter().any(|uri| other.contains(uri))
    }

    /// Adds every capability of `other` not already present.
    pub fn extend_from(&mut self, other: &Self) {
        for uri in &other.uris {
            self.insert(uri.as_str());
        }
    }

    /// Iterates over the URIs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.uris.len()
    }

    /// Returns `true` when the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

fn base_uri(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(base, _)| base).trim()
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for uri in iter {
            set.insert(uri);
        }
        set
    }
}

impl From<Vec<String>> for CapabilitySet {
    fn from(uris: Vec<String>) -> Self {
        uris.into_iter().collect()
    }
}

impl From<CapabilitySet> for Vec<String> {
    fn from(set: CapabilitySet) -> Self {
        set.uris
    }
}
