//! Transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("listen failed: {0}")]
    Listen(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("listening endpoint closed")]
    ListenerClosed,

    #[error("backend not available on this platform")]
    Unavailable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
