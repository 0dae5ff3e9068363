//! Initiator side: discovery scans and outbound connects.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use peerline_transport::{SubscriptionId, Transport};
use peerline_types::{DeviceAddress, Generation, PeerInfo, RoleMode, ServiceId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CoreError;
use crate::event::{ConnectionOutcome, ControllerEvent};
use crate::feed::{Feed, LogLevel};
use crate::task::cancel_task;

const TAG: &str = "InitiatorManager";

struct ActiveScan {
    subscription: SubscriptionId,
    forwarder: JoinHandle<()>,
    timer: JoinHandle<()>,
}

struct ConnectAttempt {
    target: DeviceAddress,
    task: JoinHandle<()>,
}

/// Runs discovery scans and at most one outbound connect attempt.
///
/// Every result is posted to the controller's event queue tagged with the
/// generation it was started under.
pub struct InitiatorManager {
    transport: Arc<dyn Transport>,
    service: ServiceId,
    scan_timeout: Duration,
    connect_timeout: Duration,
    events: mpsc::Sender<ControllerEvent>,
    feed: Feed,
    scan: Option<ActiveScan>,
    connect: Option<ConnectAttempt>,
}

impl InitiatorManager {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<ControllerEvent>,
        feed: Feed,
    ) -> Self {
        Self {
            transport,
            service: config.service.uuid,
            scan_timeout: config.scan.timeout(),
            connect_timeout: config.scan.connect_timeout(),
            events,
            feed,
            scan: None,
            connect: None,
        }
    }

    /// Start a scan, replacing any scan already running.
    ///
    /// Bonded peers are reported first as paired; discovered peers follow as
    /// they are found. If the scan is not stopped within the scan timeout,
    /// discovery is halted and one [`ControllerEvent::ScanTimedOut`] is sent.
    pub async fn start_scan(&mut self, generation: Generation) -> Result<(), CoreError> {
        self.stop_scan().await;

        let subscription = self.transport.subscribe_discovery();
        let id = subscription.id;
        let bonded = self.transport.bonded_peers();
        let forwarder = tokio::spawn(forward_discoveries(
            subscription.events,
            bonded,
            self.events.clone(),
            generation,
        ));

        if let Err(e) = self.transport.start_discovery().await {
            self.transport.unsubscribe_discovery(id);
            cancel_task(forwarder).await;
            self.feed
                .log(TAG, format!("Discovery failed: {e}"), LogLevel::Error);
            return Err(e.into());
        }

        let timer = tokio::spawn(scan_timer(
            Arc::clone(&self.transport),
            id,
            self.scan_timeout,
            self.events.clone(),
            generation,
        ));
        self.scan = Some(ActiveScan {
            subscription: id,
            forwarder,
            timer,
        });
        info!(%generation, subscription = %id, "scan started");
        self.feed.log(TAG, "Scanning for devices", LogLevel::Info);
        Ok(())
    }

    /// Halt discovery and release the subscription. Safe to call at any time.
    pub async fn stop_scan(&mut self) {
        let Some(scan) = self.scan.take() else {
            return;
        };
        cancel_task(scan.timer).await;
        self.transport.cancel_discovery().await;
        self.transport.unsubscribe_discovery(scan.subscription);
        cancel_task(scan.forwarder).await;
        debug!(subscription = %scan.subscription, "scan stopped");
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Whether a connect to `target` is still running.
    pub fn is_connecting_to(&self, target: &DeviceAddress) -> bool {
        self.connect
            .as_ref()
            .is_some_and(|attempt| &attempt.target == target && !attempt.task.is_finished())
    }

    /// Connect to `target` on a background task.
    ///
    /// Stops the scan and cancels any other attempt first. The result is
    /// posted as a [`ControllerEvent::Outcome`].
    pub async fn connect(&mut self, generation: Generation, target: DeviceAddress) {
        self.stop_scan().await;
        self.cancel_connect().await;

        info!(peer = %target, %generation, "connecting");
        let task = tokio::spawn(connect_once(
            Arc::clone(&self.transport),
            target.clone(),
            self.service,
            self.connect_timeout,
            self.events.clone(),
            generation,
        ));
        self.connect = Some(ConnectAttempt { target, task });
    }

    /// Cancel the scan and any in-flight connect.
    pub async fn stop(&mut self) {
        self.stop_scan().await;
        self.cancel_connect().await;
    }

    async fn cancel_connect(&mut self) {
        if let Some(attempt) = self.connect.take() {
            if !attempt.task.is_finished() {
                debug!(peer = %attempt.target, "cancelling connect attempt");
            }
            cancel_task(attempt.task).await;
        }
    }
}

async fn forward_discoveries(
    mut found: mpsc::Receiver<Arc<PeerInfo>>,
    bonded: Vec<Arc<PeerInfo>>,
    events: mpsc::Sender<ControllerEvent>,
    generation: Generation,
) {
    let bonded_addresses: HashSet<DeviceAddress> =
        bonded.iter().map(|peer| peer.address.clone()).collect();

    for peer in bonded {
        let event = ControllerEvent::DeviceFound {
            generation,
            peer,
            paired: true,
        };
        if events.send(event).await.is_err() {
            return;
        }
    }

    while let Some(peer) = found.recv().await {
        if bonded_addresses.contains(&peer.address) {
            continue;
        }
        let event = ControllerEvent::DeviceFound {
            generation,
            peer,
            paired: false,
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
}

async fn scan_timer(
    transport: Arc<dyn Transport>,
    subscription: SubscriptionId,
    timeout: Duration,
    events: mpsc::Sender<ControllerEvent>,
    generation: Generation,
) {
    tokio::time::sleep(timeout).await;
    transport.cancel_discovery().await;
    transport.unsubscribe_discovery(subscription);
    let _ = events.send(ControllerEvent::ScanTimedOut { generation }).await;
}

async fn connect_once(
    transport: Arc<dyn Transport>,
    target: DeviceAddress,
    service: ServiceId,
    timeout: Duration,
    events: mpsc::Sender<ControllerEvent>,
    generation: Generation,
) {
    let attempt = tokio::time::timeout(timeout, transport.connect(&target, service)).await;
    let outcome = match attempt {
        Ok(Ok(stream)) => ConnectionOutcome::Connected(stream),
        Ok(Err(e)) => ConnectionOutcome::Failed {
            peer: Some(target),
            reason: e.to_string(),
        },
        Err(_) => ConnectionOutcome::TimedOut { peer: target },
    };
    let _ = events
        .send(ControllerEvent::Outcome {
            generation,
            role: RoleMode::Initiator,
            outcome,
        })
        .await;
}
