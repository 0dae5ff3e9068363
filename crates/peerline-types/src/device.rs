//! Discovered device types.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::address::DeviceAddress;

/// Name shown for peers that did not report one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// A peer as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Transport address (identity key).
    pub address: DeviceAddress,
    /// Best-effort human-readable name.
    pub name: Option<String>,
}

impl PeerInfo {
    pub fn new(address: impl Into<DeviceAddress>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }

    /// The reported name, or [`UNKNOWN_DEVICE_NAME`].
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

/// One entry of the device registry.
///
/// Holds only a weak reference to the transport's peer object: the
/// transport owns that lifecycle, the registry just caches identity for
/// later connect calls.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub address: DeviceAddress,
    pub name: Option<String>,
    /// Whether the peer was already bonded when it was discovered.
    pub paired: bool,
    peer: Weak<PeerInfo>,
}

impl DeviceRecord {
    pub fn new(peer: &Arc<PeerInfo>, paired: bool) -> Self {
        Self {
            address: peer.address.clone(),
            name: peer.name.clone(),
            paired,
            peer: Arc::downgrade(peer),
        }
    }

    /// The transport's peer object, if the transport still holds it.
    pub fn peer(&self) -> Option<Arc<PeerInfo>> {
        self.peer.upgrade()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.name == other.name && self.paired == other.paired
    }
}

impl Eq for DeviceRecord {}

impl std::fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)?;
        if self.paired {
            write!(f, " [paired]")?;
        }
        Ok(())
    }
}
