//! Core errors.

use peerline_types::{Generation, RoleMode};
use thiserror::Error;

use crate::state::RoleState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("required permissions not granted")]
    PermissionDenied,

    #[error("radio is disabled")]
    RadioDisabled,

    #[error("scan timed out")]
    ScanTimedOut,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("listen failed: {0}")]
    ListenFailed(String),

    #[error("stream I/O error: {0}")]
    StreamIo(#[from] std::io::Error),

    #[error("stale operation {generation} discarded (current {current})")]
    StaleOperation {
        generation: Generation,
        current: Generation,
    },

    #[error("no active session")]
    NotConnected,

    #[error("message contains a line break")]
    InvalidMessage,

    #[error("{action} needs {required} mode, current state is {current}")]
    WrongMode {
        action: &'static str,
        required: RoleMode,
        current: RoleState,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] peerline_transport::TransportError),
}
