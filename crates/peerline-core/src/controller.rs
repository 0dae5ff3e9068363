//! Role controller: the single owner of all role state.

use std::sync::Arc;

use peerline_transport::{Radio, Transport};
use peerline_types::{DeviceAddress, DeviceRecord, Generation, PeerInfo, RoleMode};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CoreError;
use crate::event::{ConnectionOutcome, ControllerEvent};
use crate::feed::{Direction, Feed, LogLevel};
use crate::initiator::InitiatorManager;
use crate::registry::DeviceRegistry;
use crate::responder::{ListenerState, ResponderListener};
use crate::session::SessionChannel;
use crate::state::RoleState;

const TAG: &str = "RoleController";

/// Capacity of the controller's event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Keeps at most one of initiator or responder active and owns the current
/// session.
///
/// Every user action and every background result arrives on one queue and is
/// handled in [`run`](Self::run); operations started under an earlier
/// generation are discarded when their results arrive.
pub struct RoleController {
    state: RoleState,
    generation: Generation,
    registry: Arc<DeviceRegistry>,
    initiator: InitiatorManager,
    responder: ResponderListener,
    session: Option<SessionChannel>,
    radio: Arc<dyn Radio>,
    feed: Feed,
    event_tx: mpsc::Sender<ControllerEvent>,
    event_rx: mpsc::Receiver<ControllerEvent>,
}

impl RoleController {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        radio: Arc<dyn Radio>,
        feed: Feed,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            state: RoleState::Idle,
            generation: Generation::default(),
            registry: Arc::new(DeviceRegistry::new()),
            initiator: InitiatorManager::new(
                config,
                Arc::clone(&transport),
                event_tx.clone(),
                feed.clone(),
            ),
            responder: ResponderListener::new(config, transport, event_tx.clone(), feed.clone()),
            session: None,
            radio,
            feed,
            event_tx,
            event_rx,
        }
    }

    /// Handle for posting user actions onto the controller's queue.
    pub fn event_sender(&self) -> mpsc::Sender<ControllerEvent> {
        self.event_tx.clone()
    }

    pub fn state(&self) -> RoleState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Snapshot of the device registry, in discovery order.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Peer of the open session, if any.
    pub fn session_peer(&self) -> Option<&PeerInfo> {
        self.session.as_ref().map(SessionChannel::peer)
    }

    pub fn responder_state(&self) -> ListenerState {
        self.responder.state()
    }

    /// Switch roles.
    ///
    /// Stops whatever is running, clears the registry, closes the session and
    /// starts the requested component. Requesting the current mode does
    /// nothing. If the new component fails to start the controller ends up
    /// `Idle` and the error is returned.
    pub async fn request_mode(&mut self, mode: RoleMode) -> Result<(), CoreError> {
        if self.state == RoleState::for_mode(mode) {
            debug!(%mode, "already in requested mode");
            return Ok(());
        }
        if mode != RoleMode::Idle {
            self.ensure_radio_ready().await?;
        }

        self.generation = self.generation.next();
        self.initiator.stop().await;
        self.responder.stop().await;
        self.registry.clear();
        self.feed.devices(Vec::new());
        self.close_session().await;

        let started = match mode {
            RoleMode::Initiator => self.initiator.start_scan(self.generation).await,
            RoleMode::Responder => self.responder.start(self.generation).await.map(|address| {
                info!(%address, "responder endpoint open");
            }),
            RoleMode::Idle => Ok(()),
        };
        if let Err(e) = started {
            self.initiator.stop().await;
            self.responder.stop().await;
            self.set_state(RoleState::Idle);
            return Err(e);
        }

        self.set_state(RoleState::for_mode(mode));
        self.feed
            .log(TAG, format!("Switched to {}", mode.label()), LogLevel::Info);
        Ok(())
    }

    /// Connect to `address`. Only valid while initiating.
    ///
    /// A repeated request for the target already being connected to is
    /// ignored.
    pub async fn connect(&mut self, address: DeviceAddress) -> Result<(), CoreError> {
        if self.state != RoleState::Initiating {
            return Err(CoreError::WrongMode {
                action: "connect",
                required: RoleMode::Initiator,
                current: self.state,
            });
        }
        if self.initiator.is_connecting_to(&address) {
            debug!(peer = %address, "connect already in flight");
            return Ok(());
        }

        self.generation = self.generation.next();
        let name = self
            .registry
            .get(&address)
            .map_or_else(|| address.to_string(), |record| record.display_name().to_string());
        self.feed
            .log(TAG, format!("Connecting to {name}"), LogLevel::Info);
        self.initiator.connect(self.generation, address).await;
        Ok(())
    }

    /// Send one line over the open session and echo it to the feed.
    pub fn send(&self, text: &str) -> Result<(), CoreError> {
        let session = self.session.as_ref().ok_or(CoreError::NotConnected)?;
        session.send(text)?;
        self.feed.message(Direction::Outgoing, text);
        Ok(())
    }

    /// Handle events until [`ControllerEvent::Shutdown`] arrives, then stop
    /// everything.
    pub async fn run(&mut self) {
        while self.process_next().await {}
        self.shutdown().await;
    }

    /// Wait for and handle one event. Returns `false` once the loop should
    /// end.
    pub async fn process_next(&mut self) -> bool {
        // The controller holds its own sender, so the queue never closes.
        match self.event_rx.recv().await {
            Some(event) => self.handle_event(event).await,
            None => false,
        }
    }

    /// Stop both components, close the session and go idle.
    pub async fn shutdown(&mut self) {
        self.generation = self.generation.next();
        self.initiator.stop().await;
        self.responder.stop().await;
        self.close_session().await;
        self.registry.clear();
        self.set_state(RoleState::Idle);
        info!("controller stopped");
    }

    /// Handle one event. Returns `false` for [`ControllerEvent::Shutdown`].
    pub async fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::RequestMode(mode) => {
                if let Err(e) = self.request_mode(mode).await {
                    self.report(&e);
                }
            }
            ControllerEvent::Connect(address) => {
                if let Err(e) = self.connect(address).await {
                    self.report(&e);
                }
            }
            ControllerEvent::Send(text) => {
                if let Err(e) = self.send(&text) {
                    self.report(&e);
                }
            }
            ControllerEvent::DeviceFound {
                generation,
                peer,
                paired,
            } => {
                if self.is_current(generation) && self.registry.add(&peer, paired) {
                    debug!(peer = %peer.address, paired, "device found");
                    self.feed.devices(self.registry.snapshot());
                }
            }
            ControllerEvent::ScanTimedOut { generation } => {
                if self.is_current(generation) {
                    self.initiator.stop_scan().await;
                    self.feed
                        .log(TAG, CoreError::ScanTimedOut.to_string(), LogLevel::Debug);
                }
            }
            ControllerEvent::Outcome {
                generation,
                role,
                outcome,
            } => {
                if self.is_current(generation) {
                    self.handle_outcome(role, outcome).await;
                }
            }
            ControllerEvent::MessageReceived { generation, text } => {
                if self.is_session_current(generation) {
                    self.feed.message(Direction::Incoming, text);
                }
            }
            ControllerEvent::SessionEnded { generation, error } => {
                if self.is_session_current(generation) {
                    self.handle_session_ended(error).await;
                }
            }
            ControllerEvent::Shutdown => return false,
        }
        true
    }

    async fn handle_outcome(&mut self, role: RoleMode, outcome: ConnectionOutcome) {
        match outcome {
            ConnectionOutcome::Connected(stream) => {
                let peer = stream.peer().clone();
                match role {
                    RoleMode::Responder => {
                        self.feed.log(TAG, "Client connected", LogLevel::Info);
                    }
                    _ => self.feed.log(
                        TAG,
                        format!("Connected to {}", peer.display_name()),
                        LogLevel::Info,
                    ),
                }
                info!(
                    peer = %peer.address,
                    %role,
                    generation = %self.generation,
                    "session established"
                );
                self.close_session().await;
                let session = SessionChannel::open(stream, self.generation, self.feed.clone());
                if let Err(e) = session.start_receiving(self.event_tx.clone()) {
                    self.report(&e);
                    return;
                }
                self.session = Some(session);
            }
            ConnectionOutcome::Failed { peer, reason } => {
                let error = match peer {
                    Some(peer) => CoreError::ConnectFailed(format!("{peer}: {reason}")),
                    None => CoreError::ListenFailed(reason),
                };
                self.report(&error);
                self.fall_back_to_idle().await;
            }
            ConnectionOutcome::TimedOut { peer } => {
                self.report(&CoreError::ConnectFailed(format!("{peer}: timed out")));
                self.fall_back_to_idle().await;
            }
        }
    }

    async fn handle_session_ended(&mut self, error: Option<String>) {
        let peer = self
            .session
            .as_ref()
            .map(|session| session.peer().display_name().to_string())
            .unwrap_or_default();
        match error {
            Some(error) => self.feed.log(
                TAG,
                format!("Connection to {peer} lost: {error}"),
                LogLevel::Warn,
            ),
            None => self
                .feed
                .log(TAG, format!("{peer} disconnected"), LogLevel::Info),
        }
        self.close_session().await;
        self.fall_back_to_idle().await;
    }

    async fn fall_back_to_idle(&mut self) {
        if let Err(e) = self.request_mode(RoleMode::Idle).await {
            self.report(&e);
        }
    }

    async fn ensure_radio_ready(&self) -> Result<(), CoreError> {
        if !self.radio.has_permissions() && !self.radio.request_permissions().await {
            self.feed
                .log(TAG, "Required permissions not granted", LogLevel::Error);
            return Err(CoreError::PermissionDenied);
        }
        if !self.radio.is_enabled() && !self.radio.request_enable().await {
            self.feed.log(TAG, "Radio is disabled", LogLevel::Error);
            return Err(CoreError::RadioDisabled);
        }
        Ok(())
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            if session.close().await {
                debug!(peer = %session.peer().address, "session closed");
            }
        }
    }

    fn set_state(&mut self, state: RoleState) {
        if self.state != state {
            self.state = state;
            self.feed.role(state);
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        if generation == self.generation {
            return true;
        }
        self.discard(generation, self.generation);
        false
    }

    fn is_session_current(&self, generation: Generation) -> bool {
        match &self.session {
            Some(session) if session.generation() == generation => true,
            Some(session) => {
                self.discard(generation, session.generation());
                false
            }
            None => {
                self.discard(generation, self.generation);
                false
            }
        }
    }

    fn discard(&self, generation: Generation, current: Generation) {
        let stale = CoreError::StaleOperation {
            generation,
            current,
        };
        self.feed.log(TAG, stale.to_string(), LogLevel::Debug);
    }

    fn report(&self, error: &CoreError) {
        self.feed.log(TAG, error.to_string(), LogLevel::Error);
    }
}
