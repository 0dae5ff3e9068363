//! Deduplicated registry of discovered devices.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use peerline_types::{DeviceAddress, DeviceRecord, PeerInfo};

#[derive(Debug, Default)]
struct Entries {
    ordered: Vec<DeviceRecord>,
    addresses: HashSet<DeviceAddress>,
}

/// Devices found during the current scan, one record per address, in
/// first-seen order.
///
/// Writers are serialized behind the lock; a snapshot is a copy taken under
/// the read lock, so it never contains a partially inserted record.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: RwLock<Entries>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for `peer` unless its address is already present.
    ///
    /// Returns whether a record was inserted.
    pub fn add(&self, peer: &Arc<PeerInfo>, paired: bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.addresses.insert(peer.address.clone()) {
            return false;
        }
        entries.ordered.push(DeviceRecord::new(peer, paired));
        true
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.ordered.clear();
        entries.addresses.clear();
    }

    /// Copy of every record, in insertion order.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .clone()
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<DeviceRecord> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .iter()
            .find(|record| &record.address == address)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
