//! # Fleet Membership
//!
//! The fleet is the set of node addresses a client tracks. The singleton
//! `{"*"}` disables filtering. Mutations travel to workers (and, with the
//! external state backend, to peer processes) as [`FleetDelta`] messages.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fleet entry that disables filtering.
pub const FLEET_WILDCARD: &str = "*";

/// A target a caller may hand to the public API: a canonical address or a
/// human node name to be resolved through the address directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Already-canonical network address.
    Address(Address),
    /// Human-readable node name; resolved at the edge.
    NodeName(String),
}

impl Target {
    /// Classify a raw string: anything with a known address prefix parses
    /// as an address, everything else is a node name.
    pub fn parse(input: &str) -> Result<Self, crate::address::AddressError> {
        if Address::looks_like_address(input) {
            Ok(Target::Address(Address::parse(input)?))
        } else {
            Ok(Target::NodeName(input.to_string()))
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Address(a) => f.write_str(a.as_str()),
            Target::NodeName(n) => f.write_str(n),
        }
    }
}

/// Set of node addresses the client tracks.
///
/// Entries are canonical address strings, or the single wildcard entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSet {
    entries: BTreeSet<String>,
}

impl FleetSet {
    /// Empty fleet (nothing is tracked).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeSet::new(),
        }
    }

    /// The `{"*"}` fleet: every node is tracked.
    #[must_use]
    pub fn all() -> Self {
        let mut entries = BTreeSet::new();
        entries.insert(FLEET_WILDCARD.to_string());
        Self { entries }
    }

    /// Build from canonical addresses.
    pub fn from_addresses<I: IntoIterator<Item = Address>>(addresses: I) -> Self {
        Self {
            entries: addresses.into_iter().map(|a| a.as_str().to_string()).collect(),
        }
    }

    /// Whether filtering is disabled.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.entries.contains(FLEET_WILDCARD)
    }

    /// Whether an envelope from `node` passes the fleet filter.
    #[must_use]
    pub fn allows(&self, node: &str) -> bool {
        self.is_wildcard() || self.entries.contains(node)
    }

    /// Exact membership, ignoring wildcard semantics.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.entries.contains(node)
    }

    /// Add an address. Returns `false` when it was already present.
    pub fn add(&mut self, address: &Address) -> bool {
        self.entries.insert(address.as_str().to_string())
    }

    /// Remove an address. Returns `false` when it was not present.
    pub fn remove(&mut self, address: &Address) -> bool {
        self.entries.remove(address.as_str())
    }

    /// Replace the whole membership.
    pub fn replace(&mut self, other: FleetSet) {
        self.entries = other.entries;
    }

    /// Apply a broadcast delta.
    pub fn apply(&mut self, delta: &FleetDelta) -> bool {
        if delta.action >= 0 {
            self.add(&delta.address)
        } else {
            self.remove(&delta.address)
        }
    }

    /// Number of entries (wildcard counts as one).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the fleet is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the raw entries.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for FleetSet {
    fn default() -> Self {
        Self::all()
    }
}

/// A fleet mutation broadcast to workers and peer processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetDelta {
    /// The address being added or removed.
    pub address: Address,
    /// `+1` to add, `-1` to remove.
    pub action: i8,
}

impl FleetDelta {
    /// Delta that adds an address.
    #[must_use]
    pub fn add(address: Address) -> Self {
        Self { address, action: 1 }
    }

    /// Delta that removes an address.
    #[must_use]
    pub fn remove(address: Address) -> Self {
        Self {
            address,
            action: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        let mut bytes = [3u8; 33];
        bytes[0] = 0x02;
        bytes[32] = tag;
        Address::from_compressed_bytes(&bytes)
    }

    #[test]
    fn test_wildcard_allows_everything() {
        let fleet = FleetSet::all();
        assert!(fleet.is_wildcard());
        assert!(fleet.allows("anything"));
    }

    #[test]
    fn test_membership_filtering() {
        let a = addr(1);
        let fleet = FleetSet::from_addresses([a.clone()]);
        assert!(fleet.allows(a.as_str()));
        assert!(!fleet.allows(addr(2).as_str()));
    }

    #[test]
    fn test_apply_delta() {
        let mut fleet = FleetSet::empty();
        let a = addr(1);

        assert!(fleet.apply(&FleetDelta::add(a.clone())));
        assert!(fleet.contains(a.as_str()));

        assert!(fleet.apply(&FleetDelta::remove(a.clone())));
        assert!(!fleet.contains(a.as_str()));
    }

    #[test]
    fn test_target_classification() {
        let t = Target::parse(addr(1).as_str()).unwrap();
        assert!(matches!(t, Target::Address(_)));

        let t = Target::parse("gts-node-01").unwrap();
        assert!(matches!(t, Target::NodeName(_)));
    }

    #[test]
    fn test_malformed_address_target_rejected() {
        assert!(Target::parse("0xai_bogus!").is_err());
    }
}
