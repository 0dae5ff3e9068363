//! Peer addresses and service identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport address of a peer.
///
/// This is the identity key for a discovered device: unique per physical
/// peer for as long as a registry holds it. The format is owned by the
/// transport backend (`AA:BB:CC:DD:EE:FF`, `192.168.1.7:30500`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of the service a responder advertises and an initiator
/// connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// The serial-port profile UUID, used when nothing else is configured.
    pub const SERIAL_PORT: Self = Self(Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb));

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::SERIAL_PORT
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_verbatim() {
        let addr = DeviceAddress::from("AA:BB");
        assert_eq!(addr.to_string(), "AA:BB");
        assert_eq!(addr.as_str(), "AA:BB");
    }

    #[test]
    fn address_serializes_as_plain_string() {
        let addr = DeviceAddress::new("10.0.0.2:30500");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.2:30500\"");
    }

    #[test]
    fn default_service_is_serial_port_profile() {
        assert_eq!(
            ServiceId::default().to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn service_id_serde_roundtrip() {
        let id = ServiceId::from_uuid(Uuid::new_v4());
        let json = serde_json::to_string(&id).unwrap();
        let decoded: ServiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, decoded);
    }
}
