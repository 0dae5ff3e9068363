//! In-memory transport backend for testing.
//!
//! Streams are `tokio::io::duplex` pairs: the end handed to the code under
//! test is wrapped in a [`StreamHandle`], the other end is kept for the test
//! to read and write as the remote peer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use peerline_types::{DeviceAddress, PeerInfo, ServiceId};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::discovery::{DiscoverySubscription, SubscriptionId, Subscribers};
use crate::error::TransportError;
use crate::stream::StreamHandle;
use crate::{Listener, Transport};

const DUPLEX_BUFFER: usize = 64 * 1024;

/// How [`MockTransport::connect`] answers for one address.
#[derive(Debug, Clone, Default)]
pub enum ConnectPlan {
    /// Hand out a connected stream.
    #[default]
    Accept,
    /// Fail with the given reason.
    Refuse(String),
    /// Never complete; only cancellation ends the attempt.
    Hang,
}

#[derive(Debug, Default)]
struct MockState {
    bonded: Vec<Arc<PeerInfo>>,
    discovered: Vec<Arc<PeerInfo>>,
    discovering: bool,
    discovery_starts: u32,
    plans: HashMap<DeviceAddress, ConnectPlan>,
    connect_attempts: Vec<DeviceAddress>,
    remote_ends: HashMap<DeviceAddress, DuplexStream>,
    listen_failure: Option<String>,
    listener: Option<mpsc::Sender<StreamHandle>>,
    listen_calls: u32,
}

/// Mock transport backend.
///
/// Clones share state, so a test keeps one clone for control and
/// observation and hands another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    subscribers: Subscribers,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a bonded peer.
    pub fn add_bonded(&self, address: &str, name: Option<&str>) {
        let peer = Arc::new(PeerInfo::new(address, name.map(str::to_string)));
        self.state().bonded.push(peer);
    }

    /// Report a peer as found to every discovery subscriber.
    ///
    /// Delivered whether or not discovery is running, so tests can also
    /// check that stale subscriptions are gone.
    pub fn discover(&self, address: &str, name: Option<&str>) {
        let peer = Arc::new(PeerInfo::new(address, name.map(str::to_string)));
        self.state().discovered.push(Arc::clone(&peer));
        self.subscribers.publish(&peer);
    }

    /// Report an already bonded peer as found again.
    pub fn rediscover_bonded(&self, address: &str) {
        let peer = self
            .state()
            .bonded
            .iter()
            .find(|p| p.address.as_str() == address)
            .cloned();
        if let Some(peer) = peer {
            self.subscribers.publish(&peer);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    pub fn discovery_starts(&self) -> u32 {
        self.state().discovery_starts
    }

    /// Decide how connects to `address` behave.
    pub fn plan_connect(&self, address: &str, plan: ConnectPlan) {
        self.state().plans.insert(DeviceAddress::from(address), plan);
    }

    /// Every address a connect was attempted to, in order.
    pub fn connect_attempts(&self) -> Vec<DeviceAddress> {
        self.state().connect_attempts.clone()
    }

    /// Take the remote end of the last accepted connect to `address`.
    pub fn take_remote(&self, address: &str) -> Option<DuplexStream> {
        self.state().remote_ends.remove(&DeviceAddress::from(address))
    }

    /// Make the next `listen` calls fail.
    pub fn fail_listen(&self, reason: &str) {
        self.state().listen_failure = Some(reason.to_string());
    }

    pub fn listen_calls(&self) -> u32 {
        self.state().listen_calls
    }

    /// Whether a listening endpoint is currently open.
    pub fn is_listening(&self) -> bool {
        self.state()
            .listener
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Connect to the open listening endpoint as the client `address`.
    ///
    /// Returns the client's end of the stream.
    pub async fn connect_client(&self, address: &str) -> Result<DuplexStream, TransportError> {
        let tx = self
            .state()
            .listener
            .clone()
            .ok_or(TransportError::ListenerClosed)?;
        let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
        let handle = StreamHandle::new(PeerInfo::new(address, None), local);
        tx.send(handle)
            .await
            .map_err(|_| TransportError::ListenerClosed)?;
        Ok(remote)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn bonded_peers(&self) -> Vec<Arc<PeerInfo>> {
        self.state().bonded.clone()
    }

    fn subscribe_discovery(&self) -> DiscoverySubscription {
        self.subscribers.subscribe()
    }

    fn unsubscribe_discovery(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    async fn start_discovery(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.discovering = true;
        state.discovery_starts += 1;
        Ok(())
    }

    async fn cancel_discovery(&self) {
        self.state().discovering = false;
    }

    fn is_discovering(&self) -> bool {
        self.state().discovering
    }

    async fn connect(
        &self,
        address: &DeviceAddress,
        _service: ServiceId,
    ) -> Result<StreamHandle, TransportError> {
        let plan = {
            let mut state = self.state();
            state.connect_attempts.push(address.clone());
            state.plans.get(address).cloned().unwrap_or_default()
        };
        match plan {
            ConnectPlan::Accept => {
                let (local, remote) = tokio::io::duplex(DUPLEX_BUFFER);
                let mut state = self.state();
                let peer = state
                    .bonded
                    .iter()
                    .chain(state.discovered.iter())
                    .find(|p| &p.address == address)
                    .map_or_else(|| PeerInfo::new(address.clone(), None), |p| (**p).clone());
                state.remote_ends.insert(address.clone(), remote);
                Ok(StreamHandle::new(peer, local))
            }
            ConnectPlan::Refuse(reason) => Err(TransportError::Connect(reason)),
            ConnectPlan::Hang => std::future::pending().await,
        }
    }

    async fn listen(
        &self,
        _name: &str,
        _service: ServiceId,
    ) -> Result<Box<dyn Listener>, TransportError> {
        let mut state = self.state();
        state.listen_calls += 1;
        if let Some(reason) = &state.listen_failure {
            return Err(TransportError::Listen(reason.clone()));
        }
        let (tx, rx) = mpsc::channel(1);
        state.listener = Some(tx);
        Ok(Box::new(MockListener { incoming: rx }))
    }
}

/// Listening endpoint of [`MockTransport`].
struct MockListener {
    incoming: mpsc::Receiver<StreamHandle>,
}

#[async_trait]
impl Listener for MockListener {
    async fn accept(&mut self) -> Result<StreamHandle, TransportError> {
        self.incoming
            .recv()
            .await
            .ok_or(TransportError::ListenerClosed)
    }

    fn local_address(&self) -> DeviceAddress {
        DeviceAddress::from("mock:listener")
    }
}
