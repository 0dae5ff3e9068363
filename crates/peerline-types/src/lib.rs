//! Shared types for peerline.
//!
//! This crate contains the types shared across the peerline workspace:
//! peer addresses and service identifiers, discovered device records, the
//! role a node is asked to play, and the generation tags used to tell
//! current asynchronous work from superseded work.

pub mod address;
pub mod device;
pub mod generation;
pub mod role;

pub use address::{DeviceAddress, ServiceId};
pub use device::{DeviceRecord, PeerInfo, UNKNOWN_DEVICE_NAME};
pub use generation::Generation;
pub use role::{ParseRoleModeError, RoleMode};
