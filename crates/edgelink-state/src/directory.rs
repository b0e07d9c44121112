//! # Address Directory
//!
//! Bi-directional `node-name ⇄ address` map, refreshed from supervisor
//! network views. Canonical addresses pass through unchanged (legacy
//! prefixes are normalised); node names resolve through the map and may be
//! unknown.

use edgelink_types::{Address, AddressBook, Target};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// The client's view of the network's naming.
#[derive(Debug, Default)]
pub struct AddressDirectory {
    inner: RwLock<Book>,
}

#[derive(Debug, Default)]
struct Book {
    by_node: BTreeMap<String, Address>,
    by_address: BTreeMap<String, String>,
}

impl AddressDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mapping from a broadcast refresh.
    pub fn replace(&self, book: &AddressBook) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.by_node.clear();
        inner.by_address.clear();
        for (node, address) in &book.nodes {
            inner.by_node.insert(node.clone(), address.clone());
            inner
                .by_address
                .insert(address.as_str().to_string(), node.clone());
        }
    }

    /// Merge entries from a supervisor view without dropping known ones.
    pub fn merge(&self, book: &AddressBook) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (node, address) in &book.nodes {
            inner.by_node.insert(node.clone(), address.clone());
            inner
                .by_address
                .insert(address.as_str().to_string(), node.clone());
        }
    }

    /// Resolve any accepted input to an address.
    ///
    /// Inputs that already carry an address prefix are parsed (and thereby
    /// normalised); node names go through the map. `None` when a node name
    /// is unknown or an address-shaped input is malformed.
    #[must_use]
    pub fn get_address(&self, node_or_address: &str) -> Option<Address> {
        match Target::parse(node_or_address) {
            Ok(Target::Address(address)) => Some(address),
            Ok(Target::NodeName(node)) => {
                let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
                inner.by_node.get(&node).cloned()
            }
            Err(_) => None,
        }
    }

    /// Resolve an already-classified target.
    #[must_use]
    pub fn resolve(&self, target: &Target) -> Option<Address> {
        match target {
            Target::Address(address) => Some(address.clone()),
            Target::NodeName(node) => {
                let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
                inner.by_node.get(node).cloned()
            }
        }
    }

    /// Last-known human name for an address.
    #[must_use]
    pub fn get_node_for_address(&self, address: &Address) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_address.get(address.as_str()).cloned()
    }

    /// Snapshot of the current mapping, for worker refresh broadcasts.
    #[must_use]
    pub fn snapshot(&self) -> AddressBook {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        AddressBook {
            nodes: inner.by_node.clone(),
        }
    }

    /// Number of known nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_node.len()
    }

    /// Whether the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
