//! Integration tests driving the role controller over the mock transport.

use std::sync::Arc;
use std::time::Duration;

use peerline_core::{
    Config, ConnectionOutcome, ControllerEvent, CoreError, Direction, Feed, FeedEvent,
    ListenerState, LogFilter, RoleController, RoleState,
};
use peerline_transport::mock::{ConnectPlan, MockTransport};
use peerline_transport::{Radio, StaticRadio, StreamHandle, Transport};
use peerline_types::{DeviceAddress, PeerInfo, RoleMode};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

struct Harness {
    controller: RoleController,
    mock: MockTransport,
    radio: Arc<StaticRadio>,
    feed: mpsc::Receiver<FeedEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_radio(StaticRadio::ready())
    }

    fn with_radio(radio: StaticRadio) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();

        let mock = MockTransport::new();
        let radio = Arc::new(radio);
        let (feed_tx, feed) = mpsc::channel(1024);
        let transport: Arc<dyn Transport> = Arc::new(mock.clone());
        let controller = RoleController::new(
            &Config::default(),
            transport,
            Arc::clone(&radio) as Arc<dyn Radio>,
            Feed::new(feed_tx, LogFilter::Dev),
        );
        Self {
            controller,
            mock,
            radio,
            feed,
        }
    }

    /// Handle exactly one queued event.
    async fn process(&mut self) {
        let keep_running =
            tokio::time::timeout(Duration::from_secs(5), self.controller.process_next())
                .await
                .expect("event in time");
        assert!(keep_running);
    }

    /// Everything the feed received so far.
    fn drain_feed(&mut self) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.feed.try_recv() {
            events.push(event);
        }
        events
    }
}

fn messages(events: &[FeedEvent]) -> Vec<(Direction, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            FeedEvent::Message { direction, text } => Some((*direction, text.clone())),
            _ => None,
        })
        .collect()
}

fn log_lines(events: &[FeedEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            FeedEvent::Log(line) => Some(line.message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_initiator_end_to_end() {
    let mut h = Harness::new();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    assert_eq!(h.controller.state(), RoleState::Initiating);

    h.mock.discover("AA:BB", None);
    h.mock.discover("AA:BB", Some("again"));
    h.process().await;
    h.process().await;

    let devices = h.controller.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address.as_str(), "AA:BB");
    assert!(!devices[0].paired);
    assert_eq!(devices[0].display_name(), "Unknown");
    assert!(devices[0].peer().is_some());

    h.controller.connect(DeviceAddress::from("AA:BB")).await.unwrap();
    h.process().await;
    assert_eq!(
        h.controller.session_peer().map(|peer| peer.address.as_str()),
        Some("AA:BB")
    );
    assert_eq!(h.mock.subscriber_count(), 0);

    let remote = h.mock.take_remote("AA:BB").expect("remote end");
    let (remote_read, mut remote_write) = tokio::io::split(remote);
    let mut remote_lines = BufReader::new(remote_read).lines();

    h.controller.send("hello").unwrap();
    h.controller.send("bye").unwrap();
    assert_eq!(remote_lines.next_line().await.unwrap().as_deref(), Some("hello"));
    assert_eq!(remote_lines.next_line().await.unwrap().as_deref(), Some("bye"));

    remote_write.write_all(b"hi back\n").await.unwrap();
    h.process().await;

    let feed = h.drain_feed();
    assert_eq!(
        messages(&feed),
        vec![
            (Direction::Outgoing, "hello".to_string()),
            (Direction::Outgoing, "bye".to_string()),
            (Direction::Incoming, "hi back".to_string()),
        ]
    );
    assert!(log_lines(&feed).iter().any(|l| l == "Connected to Unknown"));
}

#[tokio::test]
async fn test_bonded_peers_listed_first() {
    let mut h = Harness::new();
    h.mock.add_bonded("11:11", Some("desk"));
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    h.mock.discover("AA:BB", Some("phone"));
    h.process().await;
    h.process().await;

    let devices = h.controller.devices();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].to_string(), "desk (11:11) [paired]");
    assert!(!devices[1].paired);
    assert_eq!(devices[1].display_name(), "phone");
}

#[tokio::test]
async fn test_stale_connect_outcome_is_discarded() {
    let mut h = Harness::new();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    let superseded = h.controller.generation();
    h.controller.request_mode(RoleMode::Responder).await.unwrap();
    assert!(h.controller.generation() > superseded);

    let (local, mut remote) = tokio::io::duplex(1024);
    let stream = StreamHandle::new(PeerInfo::new("AA:BB", None), local);
    h.controller
        .event_sender()
        .send(ControllerEvent::Outcome {
            generation: superseded,
            role: RoleMode::Initiator,
            outcome: ConnectionOutcome::Connected(stream),
        })
        .await
        .unwrap();
    h.process().await;

    assert!(log_lines(&h.drain_feed())
        .iter()
        .any(|l| l.starts_with("stale operation")));
    assert_eq!(h.controller.state(), RoleState::Responding);
    assert!(h.controller.session_peer().is_none());
    assert_eq!(h.controller.responder_state(), ListenerState::Listening);
    assert!(h.mock.is_listening());

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), remote.read(&mut buf))
        .await
        .expect("discarded stream is closed")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_switch_cancels_pending_connect() {
    let mut h = Harness::new();
    h.mock.plan_connect("AA:BB", ConnectPlan::Hang);
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    h.controller.connect(DeviceAddress::from("AA:BB")).await.unwrap();
    while h.mock.connect_attempts().is_empty() {
        tokio::task::yield_now().await;
    }

    h.controller.request_mode(RoleMode::Responder).await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(100), h.controller.process_next())
            .await
            .is_err(),
        "cancelled connect produces no outcome"
    );
    assert_eq!(h.controller.state(), RoleState::Responding);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_returns_to_idle() {
    let mut h = Harness::new();
    h.mock.plan_connect("AA:BB", ConnectPlan::Hang);
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    h.controller.connect(DeviceAddress::from("AA:BB")).await.unwrap();

    let started = tokio::time::Instant::now();
    let handled = tokio::time::timeout(Duration::from_secs(60), h.controller.process_next())
        .await
        .expect("timeout reported");
    assert!(handled);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert_eq!(h.controller.state(), RoleState::Idle);
    assert!(log_lines(&h.drain_feed())
        .iter()
        .any(|l| l == "connect failed: AA:BB: timed out"));
}

#[tokio::test]
async fn test_rescan_keeps_one_subscription() {
    let mut h = Harness::new();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    assert_eq!(h.mock.discovery_starts(), 1);

    h.controller.request_mode(RoleMode::Idle).await.unwrap();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    assert_eq!(h.mock.subscriber_count(), 1);
    assert_eq!(h.mock.discovery_starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scan_times_out_once() {
    let mut h = Harness::new();
    let started = tokio::time::Instant::now();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();

    let handled = tokio::time::timeout(Duration::from_secs(30), h.controller.process_next())
        .await
        .expect("scan timeout reported");
    assert!(handled);
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(!h.mock.is_discovering());
    assert_eq!(h.mock.subscriber_count(), 0);

    assert!(
        tokio::time::timeout(Duration::from_secs(60), h.controller.process_next())
            .await
            .is_err(),
        "no second timeout"
    );
    let timeouts = log_lines(&h.drain_feed())
        .into_iter()
        .filter(|line| line == "scan timed out")
        .count();
    assert_eq!(timeouts, 1);
    assert_eq!(h.controller.state(), RoleState::Initiating);
}

#[tokio::test]
async fn test_mode_switch_clears_registry() {
    let mut h = Harness::new();
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    h.mock.discover("AA:BB", None);
    h.process().await;
    assert_eq!(h.controller.devices().len(), 1);

    h.controller.request_mode(RoleMode::Responder).await.unwrap();
    assert!(h.controller.devices().is_empty());
    assert!(h.controller.registry().is_empty());
    assert!(!h.mock.is_discovering());
}

#[tokio::test]
async fn test_responder_session() {
    let mut h = Harness::new();
    h.controller.request_mode(RoleMode::Responder).await.unwrap();

    let client = h.mock.connect_client("CC:DD").await.unwrap();
    h.process().await;
    assert_eq!(h.controller.responder_state(), ListenerState::ClientAccepted);
    assert!(!h.mock.is_listening());

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut client_lines = BufReader::new(client_read).lines();
    client_write.write_all(b"ping\n").await.unwrap();
    h.process().await;
    h.controller.send("pong").unwrap();
    assert_eq!(client_lines.next_line().await.unwrap().as_deref(), Some("pong"));

    drop(client_write);
    drop(client_lines);
    h.process().await;
    assert_eq!(h.controller.state(), RoleState::Idle);
    assert!(h.controller.session_peer().is_none());

    let feed = h.drain_feed();
    assert_eq!(
        messages(&feed),
        vec![
            (Direction::Incoming, "ping".to_string()),
            (Direction::Outgoing, "pong".to_string()),
        ]
    );
    assert!(log_lines(&feed).iter().any(|l| l == "Client connected"));
}

#[tokio::test]
async fn test_responder_without_client() {
    let mut h = Harness::new();
    h.controller.request_mode(RoleMode::Responder).await.unwrap();

    assert!(
        tokio::time::timeout(Duration::from_millis(100), h.controller.process_next())
            .await
            .is_err()
    );
    h.controller.request_mode(RoleMode::Idle).await.unwrap();
    assert_eq!(h.controller.responder_state(), ListenerState::Stopped);
    assert!(!h.mock.is_listening());
}

#[tokio::test]
async fn test_permission_denied() {
    let mut h = Harness::with_radio(StaticRadio::new(true, false));
    let err = h.controller.request_mode(RoleMode::Initiator).await.unwrap_err();
    assert!(matches!(err, CoreError::PermissionDenied));
    assert_eq!(h.radio.permission_requests(), 1);
    assert_eq!(h.controller.state(), RoleState::Idle);
    assert_eq!(h.mock.discovery_starts(), 0);
}

#[tokio::test]
async fn test_radio_enable_requested() {
    let radio = StaticRadio::new(false, true);
    radio.set_grant_requests(true);
    let mut h = Harness::with_radio(radio);
    h.controller.request_mode(RoleMode::Responder).await.unwrap();
    assert_eq!(h.radio.enable_requests(), 1);
    assert_eq!(h.controller.state(), RoleState::Responding);

    let mut h = Harness::with_radio(StaticRadio::new(false, true));
    let err = h.controller.request_mode(RoleMode::Responder).await.unwrap_err();
    assert!(matches!(err, CoreError::RadioDisabled));
    assert_eq!(h.mock.listen_calls(), 0);
}

#[tokio::test]
async fn test_connect_refused_returns_to_idle() {
    let mut h = Harness::new();
    h.mock.plan_connect("AA:BB", ConnectPlan::Refuse("host down".into()));
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();
    h.mock.discover("AA:BB", None);
    h.process().await;

    h.controller.connect(DeviceAddress::from("AA:BB")).await.unwrap();
    h.process().await;
    assert_eq!(h.controller.state(), RoleState::Idle);
    assert!(h.controller.devices().is_empty());
    assert!(log_lines(&h.drain_feed())
        .iter()
        .any(|l| l.starts_with("connect failed: AA:BB") && l.contains("host down")));
}

#[tokio::test]
async fn test_repeated_connect_is_ignored() {
    let mut h = Harness::new();
    h.mock.plan_connect("AA:BB", ConnectPlan::Hang);
    h.controller.request_mode(RoleMode::Initiator).await.unwrap();

    h.controller.connect(DeviceAddress::from("AA:BB")).await.unwrap();
    let generation = h.controller.generation();
    h.controller.connect(DeviceAddress::from("AA:BB")).await.unwrap();
    assert_eq!(h.controller.generation(), generation);
}

#[tokio::test]
async fn test_wrong_mode_and_no_session() {
    let mut h = Harness::new();
    let err = h
        .controller
        .connect(DeviceAddress::from("AA:BB"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::WrongMode {
            required: RoleMode::Initiator,
            current: RoleState::Idle,
            ..
        }
    ));
    assert!(h.mock.connect_attempts().is_empty());
    assert!(matches!(h.controller.send("hi"), Err(CoreError::NotConnected)));
}

#[tokio::test]
async fn test_listen_failure_returns_to_idle() {
    let mut h = Harness::new();
    h.mock.fail_listen("address in use");
    let err = h.controller.request_mode(RoleMode::Responder).await.unwrap_err();
    assert!(matches!(err, CoreError::ListenFailed(_)));
    assert_eq!(h.controller.state(), RoleState::Idle);
    assert_eq!(h.controller.responder_state(), ListenerState::Error);
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let mut h = Harness::new();
    let events = h.controller.event_sender();
    events
        .send(ControllerEvent::RequestMode(RoleMode::Responder))
        .await
        .unwrap();
    events.send(ControllerEvent::Send("nobody".into())).await.unwrap();
    events.send(ControllerEvent::Shutdown).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), h.controller.run())
        .await
        .expect("loop ends on shutdown");
    assert_eq!(h.controller.state(), RoleState::Idle);
    assert!(!h.mock.is_listening());

    let feed = h.drain_feed();
    assert!(feed.contains(&FeedEvent::Role(RoleState::Responding)));
    assert!(log_lines(&feed).iter().any(|l| l == "no active session"));
}
