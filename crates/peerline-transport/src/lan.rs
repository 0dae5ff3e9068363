//! LAN backend: TCP streams, UDP multicast beacons for discovery.
//!
//! A responder binds a TCP listener and, while it listens, multicasts a
//! beacon every [`BEACON_INTERVAL`]:
//!   bincode v2 (serde) of `Beacon { service, service_name, name, port }`
//! An initiator's discovery joins the group and reports each sender of a
//! beacon for the configured service as a peer addressed `ip:port`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use peerline_types::{DeviceAddress, PeerInfo, ServiceId};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::discovery::{DiscoverySubscription, SubscriptionId, Subscribers};
use crate::error::TransportError;
use crate::stream::StreamHandle;
use crate::{Listener, Transport};

/// Multicast group beacons are sent to.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);

/// Interval between two beacons of a listening responder.
pub const BEACON_INTERVAL: Duration = Duration::from_secs(2);

/// Largest beacon accepted. Anything bigger is not ours.
const MAX_BEACON_SIZE: usize = 512;

/// Settings for [`LanTransport`].
#[derive(Debug, Clone)]
pub struct LanOptions {
    /// Address the TCP listener binds to.
    pub bind: IpAddr,
    /// TCP port for inbound streams (0 picks an ephemeral port).
    pub listen_port: u16,
    /// UDP port beacons are sent to and received on.
    pub discovery_port: u16,
    /// Name advertised in beacons.
    pub node_name: String,
    /// Only beacons for this service are reported by discovery.
    pub service: ServiceId,
    /// Peers treated as bonded.
    pub paired: Vec<PeerInfo>,
}

impl Default for LanOptions {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 30500,
            discovery_port: 30501,
            node_name: "peerline".to_string(),
            service: ServiceId::default(),
            paired: Vec::new(),
        }
    }
}

/// Service announcement multicast by a listening responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub service: Uuid,
    pub service_name: String,
    pub name: String,
    pub port: u16,
}

/// Encode a beacon datagram.
pub fn encode_beacon(beacon: &Beacon) -> Result<Vec<u8>, TransportError> {
    let bytes = bincode::serde::encode_to_vec(beacon, bincode::config::standard())
        .map_err(|e| TransportError::Discovery(format!("beacon encode: {e}")))?;
    if bytes.len() > MAX_BEACON_SIZE {
        return Err(TransportError::Discovery(format!(
            "beacon size {} exceeds maximum {MAX_BEACON_SIZE}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Decode a beacon datagram.
pub fn decode_beacon(bytes: &[u8]) -> Result<Beacon, TransportError> {
    let (beacon, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| TransportError::Discovery(format!("beacon decode: {e}")))?;
    Ok(beacon)
}

/// A peer heard from during discovery.
#[derive(Debug)]
struct SeenPeer {
    info: Arc<PeerInfo>,
    service: Uuid,
}

type SeenPeers = Arc<Mutex<HashMap<DeviceAddress, SeenPeer>>>;

/// LAN transport: TCP for streams, UDP multicast for discovery.
pub struct LanTransport {
    options: LanOptions,
    bonded: Vec<Arc<PeerInfo>>,
    seen: SeenPeers,
    subscribers: Subscribers,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl LanTransport {
    pub fn new(options: LanOptions) -> Self {
        let bonded = options.paired.iter().cloned().map(Arc::new).collect();
        Self {
            options,
            bonded,
            seen: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Subscribers::new(),
            discovery: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &LanOptions {
        &self.options
    }

    fn known_peer(&self, address: &DeviceAddress) -> Option<(Arc<PeerInfo>, Option<Uuid>)> {
        if let Some(seen) = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
        {
            return Some((Arc::clone(&seen.info), Some(seen.service)));
        }
        self.bonded
            .iter()
            .find(|peer| &peer.address == address)
            .map(|peer| (Arc::clone(peer), None))
    }
}

#[async_trait]
impl Transport for LanTransport {
    fn bonded_peers(&self) -> Vec<Arc<PeerInfo>> {
        self.bonded.clone()
    }

    fn subscribe_discovery(&self) -> DiscoverySubscription {
        self.subscribers.subscribe()
    }

    fn unsubscribe_discovery(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    async fn start_discovery(&self) -> Result<(), TransportError> {
        if self.is_discovering() {
            return Ok(());
        }
        let socket = discovery_socket(self.options.discovery_port)
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let task = tokio::spawn(discovery_loop(
            socket,
            *self.options.service.as_uuid(),
            Arc::clone(&self.seen),
            self.subscribers.clone(),
        ));
        *self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
        info!(port = self.options.discovery_port, "discovery started");
        Ok(())
    }

    async fn cancel_discovery(&self) {
        let task = self
            .discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };
        task.abort();
        // The socket is dropped with the task; wait so the port is free.
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!(error = %e, "discovery task panicked");
            }
        }
        debug!("discovery cancelled");
    }

    fn is_discovering(&self) -> bool {
        self.discovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn connect(
        &self,
        address: &DeviceAddress,
        service: ServiceId,
    ) -> Result<StreamHandle, TransportError> {
        let addr: SocketAddr = address
            .as_str()
            .parse()
            .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;

        let known = self.known_peer(address);
        if let Some((_, Some(offered))) = &known {
            if offered != service.as_uuid() {
                return Err(TransportError::Connect(format!(
                    "{address} does not offer service {service}"
                )));
            }
        }

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        stream.set_nodelay(true)?;

        let peer = known.map_or_else(
            || PeerInfo::new(address.clone(), None),
            |(info, _)| (*info).clone(),
        );
        debug!(remote = %addr, %service, "connected to peer");
        Ok(StreamHandle::new(peer, stream))
    }

    async fn listen(
        &self,
        name: &str,
        service: ServiceId,
    ) -> Result<Box<dyn Listener>, TransportError> {
        let listener = TcpListener::bind((self.options.bind, self.options.listen_port))
            .await
            .map_err(|e| TransportError::Listen(e.to_string()))?;
        let local = listener.local_addr()?;

        let beacon = Beacon {
            service: *service.as_uuid(),
            service_name: name.to_string(),
            name: self.options.node_name.clone(),
            port: local.port(),
        };
        let datagram = encode_beacon(&beacon)?;
        let advertiser = tokio::spawn(advertise_loop(datagram, self.options.discovery_port));

        info!(addr = %local, service = %service, name, "listening");
        Ok(Box::new(LanListener {
            listener,
            local,
            advertiser,
        }))
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        let task = self
            .discovery
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Bound TCP listener plus its beacon task.
struct LanListener {
    listener: TcpListener,
    local: SocketAddr,
    advertiser: JoinHandle<()>,
}

#[async_trait]
impl Listener for LanListener {
    async fn accept(&mut self) -> Result<StreamHandle, TransportError> {
        let (stream, remote) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(remote = %remote, "accepted connection");
        Ok(StreamHandle::new(
            PeerInfo::new(remote.to_string(), None),
            stream,
        ))
    }

    fn local_address(&self) -> DeviceAddress {
        DeviceAddress::new(self.local.to_string())
    }
}

impl Drop for LanListener {
    fn drop(&mut self) {
        self.advertiser.abort();
        debug!(addr = %self.local, "listener closed");
    }
}

fn discovery_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.join_multicast_v4(&DISCOVERY_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn discovery_loop(
    socket: UdpSocket,
    service: Uuid,
    seen: SeenPeers,
    subscribers: Subscribers,
) {
    let mut buf = [0u8; MAX_BEACON_SIZE];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "discovery socket failed");
                return;
            }
        };
        let beacon = match decode_beacon(&buf[..n]) {
            Ok(beacon) => beacon,
            Err(e) => {
                trace!(from = %from, error = %e, "ignoring datagram");
                continue;
            }
        };
        if beacon.service != service {
            trace!(from = %from, service = %beacon.service, "beacon for another service");
            continue;
        }
        let address = DeviceAddress::new(SocketAddr::new(from.ip(), beacon.port).to_string());
        let peer = {
            let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = seen.entry(address.clone()).or_insert_with(|| SeenPeer {
                info: Arc::new(PeerInfo::new(address, Some(beacon.name.clone()))),
                service: beacon.service,
            });
            entry.service = beacon.service;
            Arc::clone(&entry.info)
        };
        trace!(address = %peer.address, service = %beacon.service, "beacon received");
        subscribers.publish(&peer);
    }
}

async fn advertise_loop(datagram: Vec<u8>, discovery_port: u16) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "cannot open beacon socket, not advertising");
            return;
        }
    };
    if let Err(e) = socket.set_multicast_ttl_v4(1) {
        debug!(error = %e, "failed to set beacon TTL");
    }
    let dest = SocketAddr::new(IpAddr::V4(DISCOVERY_GROUP), discovery_port);
    loop {
        if let Err(e) = socket.send_to(&datagram, dest).await {
            debug!(error = %e, "beacon send failed");
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon() -> Beacon {
        Beacon {
            service: *ServiceId::SERIAL_PORT.as_uuid(),
            service_name: "BTServer".to_string(),
            name: "desk".to_string(),
            port: 30500,
        }
    }

    #[test]
    fn beacon_decodes_what_was_encoded() {
        let bytes = encode_beacon(&beacon()).unwrap();
        assert!(bytes.len() <= MAX_BEACON_SIZE);
        assert_eq!(decode_beacon(&bytes).unwrap(), beacon());
    }

    #[test]
    fn garbage_is_not_a_beacon() {
        assert!(decode_beacon(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn oversized_beacon_is_rejected() {
        let mut b = beacon();
        b.name = "x".repeat(MAX_BEACON_SIZE);
        assert!(matches!(
            encode_beacon(&b),
            Err(TransportError::Discovery(_))
        ));
    }

    #[test]
    fn configured_pairs_are_bonded() {
        let transport = LanTransport::new(LanOptions {
            paired: vec![PeerInfo::new("10.0.0.9:30500", Some("laptop".to_string()))],
            ..LanOptions::default()
        });
        let bonded = transport.bonded_peers();
        assert_eq!(bonded.len(), 1);
        assert_eq!(bonded[0].display_name(), "laptop");
    }

    fn discovery_transport(port: u16) -> LanTransport {
        LanTransport::new(LanOptions {
            discovery_port: port,
            ..LanOptions::default()
        })
    }

    async fn send_beacon(beacon: &Beacon, port: u16) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let bytes = encode_beacon(beacon).unwrap();
        socket
            .send_to(&bytes, (Ipv4Addr::LOCALHOST, port))
            .await
            .unwrap();
    }

    async fn next_peer(sub: &mut DiscoverySubscription) -> Arc<PeerInfo> {
        tokio::time::timeout(Duration::from_secs(5), sub.events.recv())
            .await
            .expect("peer in time")
            .expect("subscription open")
    }

    #[tokio::test]
    async fn discovery_restarts_on_the_same_port() {
        let transport = discovery_transport(39_611);
        transport.start_discovery().await.unwrap();
        transport.cancel_discovery().await;
        assert!(!transport.is_discovering());

        transport.start_discovery().await.unwrap();
        assert!(transport.is_discovering());
        transport.cancel_discovery().await;
    }

    #[tokio::test]
    async fn beacons_for_other_services_are_ignored() {
        let transport = discovery_transport(39_612);
        let mut sub = transport.subscribe_discovery();
        transport.start_discovery().await.unwrap();

        let stranger = Beacon {
            service: Uuid::from_u128(0xdead_beef),
            name: "stranger".to_string(),
            port: 30_600,
            ..beacon()
        };
        send_beacon(&stranger, 39_612).await;
        send_beacon(&beacon(), 39_612).await;

        let peer = next_peer(&mut sub).await;
        assert_eq!(peer.display_name(), "desk");
        assert_eq!(peer.address.as_str(), "127.0.0.1:30500");
        assert!(sub.events.try_recv().is_err());
        transport.cancel_discovery().await;
    }

    #[tokio::test]
    async fn restart_forgets_peers_from_the_previous_scan() {
        let transport = discovery_transport(39_613);
        let mut sub = transport.subscribe_discovery();
        transport.start_discovery().await.unwrap();
        send_beacon(&beacon(), 39_613).await;
        next_peer(&mut sub).await;
        assert_eq!(transport.seen.lock().unwrap().len(), 1);

        transport.cancel_discovery().await;
        transport.start_discovery().await.unwrap();
        assert!(transport.seen.lock().unwrap().is_empty());
        transport.cancel_discovery().await;
    }

    #[tokio::test]
    async fn connect_rejects_unparseable_address() {
        let transport = LanTransport::new(LanOptions::default());
        let err = transport
            .connect(&DeviceAddress::from("AA:BB"), ServiceId::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }
}
