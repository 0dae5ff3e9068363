//! Events processed by the role controller.

use std::sync::Arc;

use peerline_transport::StreamHandle;
use peerline_types::{DeviceAddress, Generation, PeerInfo, RoleMode};

/// Result of a connect (initiator) or accept (responder) operation.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// A stream is open; its peer identity travels with the handle.
    Connected(StreamHandle),
    /// The operation failed. `peer` is `None` for listen/accept failures.
    Failed {
        peer: Option<DeviceAddress>,
        reason: String,
    },
    /// The connect attempt did not complete within the connect timeout.
    TimedOut { peer: DeviceAddress },
}

/// Everything the controller's foreground loop reacts to: user actions from
/// the presentation layer and results from background operations.
///
/// Results carry the generation of the operation that produced them.
#[derive(Debug)]
pub enum ControllerEvent {
    /// Switch roles.
    RequestMode(RoleMode),
    /// Connect to a discovered or bonded peer.
    Connect(DeviceAddress),
    /// Send a line of text over the active session.
    Send(String),
    /// A peer was reported during a scan.
    DeviceFound {
        generation: Generation,
        peer: Arc<PeerInfo>,
        paired: bool,
    },
    /// The scan ran its full timeout without being stopped.
    ScanTimedOut { generation: Generation },
    /// A connect or accept finished.
    Outcome {
        generation: Generation,
        role: RoleMode,
        outcome: ConnectionOutcome,
    },
    /// One complete line arrived on a session.
    MessageReceived { generation: Generation, text: String },
    /// A session's receive loop ended (EOF, or the read error).
    SessionEnded {
        generation: Generation,
        error: Option<String>,
    },
    /// Stop everything and leave the loop.
    Shutdown,
}
