//! Transport and radio abstractions for peerline.
//!
//! Defines the [`Transport`] and [`Listener`] traits a backend implements to
//! enumerate bonded peers, run discovery, connect outward and accept one
//! inbound stream, plus the [`Radio`] trait for the platform's
//! power/permission flow. The [`lan`] backend carries streams over TCP and
//! discovers responders through UDP multicast beacons; the `mock` feature
//! adds an in-memory backend for tests.

use std::sync::Arc;

use async_trait::async_trait;
use peerline_types::{DeviceAddress, PeerInfo, ServiceId};

pub mod discovery;
pub mod error;
pub mod lan;
#[cfg(feature = "mock")]
pub mod mock;
pub mod radio;
pub mod stream;

pub use discovery::{DiscoverySubscription, SubscriptionId, Subscribers};
pub use error::TransportError;
pub use lan::{LanOptions, LanTransport};
pub use radio::{Radio, StaticRadio};
pub use stream::{PeerStream, StreamHandle};

/// Discovery, outbound connect and inbound listen for one radio.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Peers already bonded with this device.
    fn bonded_peers(&self) -> Vec<Arc<PeerInfo>>;

    /// Register for discovery-found events.
    fn subscribe_discovery(&self) -> DiscoverySubscription;

    /// Release a discovery subscription; its event stream ends.
    fn unsubscribe_discovery(&self, id: SubscriptionId);

    /// Begin active discovery. No-op if discovery is already running.
    async fn start_discovery(&self) -> Result<(), TransportError>;

    /// Halt active discovery. Safe to call when not discovering.
    ///
    /// Every resource discovery held is released when this returns.
    async fn cancel_discovery(&self);

    fn is_discovering(&self) -> bool;

    /// Open a stream to `address` for the given service.
    ///
    /// Cancelled by dropping the future.
    async fn connect(
        &self,
        address: &DeviceAddress,
        service: ServiceId,
    ) -> Result<StreamHandle, TransportError>;

    /// Bind a listening endpoint advertising `service` under `name`.
    async fn listen(
        &self,
        name: &str,
        service: ServiceId,
    ) -> Result<Box<dyn Listener>, TransportError>;
}

/// A bound listening endpoint. Dropping it closes the endpoint.
#[async_trait]
pub trait Listener: Send + 'static {
    /// Wait for the next inbound connection.
    ///
    /// Cancelled by dropping the future.
    async fn accept(&mut self) -> Result<StreamHandle, TransportError>;

    /// Address peers connect to.
    fn local_address(&self) -> DeviceAddress;
}
