//! Responder side: a single-shot listening endpoint.

use std::sync::Arc;

use peerline_transport::{Listener, Transport};
use peerline_types::{DeviceAddress, Generation, RoleMode, ServiceId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CoreError;
use crate::event::{ConnectionOutcome, ControllerEvent};
use crate::feed::{Feed, LogLevel};
use crate::task::cancel_task;

const TAG: &str = "ResponderListener";

/// Lifecycle of the listening endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerState {
    #[default]
    NotListening,
    Listening,
    /// One client was accepted and the endpoint closed.
    ClientAccepted,
    /// Stopped before any client arrived.
    Stopped,
    Error,
}

/// Listens for exactly one inbound connection per [`start`](Self::start).
pub struct ResponderListener {
    transport: Arc<dyn Transport>,
    service_name: String,
    service: ServiceId,
    events: mpsc::Sender<ControllerEvent>,
    feed: Feed,
    state: Arc<watch::Sender<ListenerState>>,
    active: Option<JoinHandle<()>>,
    local_address: Option<DeviceAddress>,
}

impl ResponderListener {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        events: mpsc::Sender<ControllerEvent>,
        feed: Feed,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::NotListening);
        Self {
            transport,
            service_name: config.service.name.clone(),
            service: config.service.uuid,
            events,
            feed,
            state: Arc::new(state),
            active: None,
            local_address: None,
        }
    }

    /// Bind the endpoint and wait for one client on a background task.
    ///
    /// Returns the address clients connect to. The accepted stream, or the
    /// accept error, is posted as a [`ControllerEvent::Outcome`].
    pub async fn start(&mut self, generation: Generation) -> Result<DeviceAddress, CoreError> {
        self.stop().await;

        let listener = match self.transport.listen(&self.service_name, self.service).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.send_replace(ListenerState::Error);
                self.feed
                    .log(TAG, format!("Server error: {e}"), LogLevel::Error);
                return Err(CoreError::ListenFailed(e.to_string()));
            }
        };

        let address = listener.local_address();
        self.state.send_replace(ListenerState::Listening);
        info!(%address, service = %self.service, %generation, "listening");
        self.feed
            .log(TAG, "Server waiting for connection", LogLevel::Info);

        self.active = Some(tokio::spawn(accept_once(
            listener,
            Arc::clone(&self.state),
            self.events.clone(),
            self.feed.clone(),
            generation,
        )));
        self.local_address = Some(address.clone());
        Ok(address)
    }

    /// Cancel the pending accept and close the endpoint. Safe to call at any
    /// time.
    pub async fn stop(&mut self) {
        self.local_address = None;
        let Some(task) = self.active.take() else {
            return;
        };
        cancel_task(task).await;
        self.state.send_if_modified(|state| {
            if *state == ListenerState::Listening {
                *state = ListenerState::Stopped;
                true
            } else {
                false
            }
        });
        self.feed
            .log(TAG, "Peripheral server stopped", LogLevel::Debug);
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Address of the open endpoint, while listening.
    pub fn local_address(&self) -> Option<&DeviceAddress> {
        self.local_address.as_ref()
    }
}

async fn accept_once(
    mut listener: Box<dyn Listener>,
    state: Arc<watch::Sender<ListenerState>>,
    events: mpsc::Sender<ControllerEvent>,
    feed: Feed,
    generation: Generation,
) {
    let accepted = listener.accept().await;
    drop(listener);

    let outcome = match accepted {
        Ok(stream) => {
            state.send_replace(ListenerState::ClientAccepted);
            debug!(peer = %stream.peer().address, "client accepted, endpoint closed");
            ConnectionOutcome::Connected(stream)
        }
        Err(e) => {
            state.send_replace(ListenerState::Error);
            feed.log(TAG, format!("Server error: {e}"), LogLevel::Error);
            ConnectionOutcome::Failed {
                peer: None,
                reason: e.to_string(),
            }
        }
    };
    let _ = events
        .send(ControllerEvent::Outcome {
            generation,
            role: RoleMode::Responder,
            outcome,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use peerline_transport::mock::MockTransport;

    use super::*;

    fn listener(mock: &MockTransport) -> (ResponderListener, mpsc::Receiver<ControllerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let listener = ResponderListener::new(
            &Config::default(),
            Arc::new(mock.clone()),
            tx,
            Feed::disabled(),
        );
        (listener, rx)
    }

    #[tokio::test]
    async fn accepts_one_client_then_closes() {
        let mock = MockTransport::new();
        let (mut responder, mut rx) = listener(&mock);
        let mut states = responder.subscribe_state();

        responder.start(Generation::new(4)).await.unwrap();
        assert_eq!(responder.state(), ListenerState::Listening);
        assert!(mock.is_listening());

        let _client = mock.connect_client("CC:DD").await.unwrap();
        match rx.recv().await {
            Some(ControllerEvent::Outcome {
                generation,
                role: RoleMode::Responder,
                outcome: ConnectionOutcome::Connected(stream),
            }) => {
                assert_eq!(generation, Generation::new(4));
                assert_eq!(stream.peer().address.as_str(), "CC:DD");
            }
            other => panic!("unexpected event {other:?}"),
        }
        states
            .wait_for(|s| *s == ListenerState::ClientAccepted)
            .await
            .unwrap();
        assert!(!mock.is_listening());
    }

    #[tokio::test]
    async fn no_client_means_no_event() {
        let mock = MockTransport::new();
        let (mut responder, mut rx) = listener(&mock);

        responder.start(Generation::new(1)).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());

        responder.stop().await;
        assert_eq!(responder.state(), ListenerState::Stopped);
        assert!(!mock.is_listening());
        assert!(responder.local_address().is_none());
        responder.stop().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let mock = MockTransport::new();
        mock.fail_listen("address in use");
        let (mut responder, mut rx) = listener(&mock);

        let err = responder.start(Generation::new(1)).await.unwrap_err();
        assert!(
            matches!(err, CoreError::ListenFailed(reason) if reason.contains("address in use"))
        );
        assert_eq!(responder.state(), ListenerState::Error);
        assert!(rx.try_recv().is_err());
    }
}
