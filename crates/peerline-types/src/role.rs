//! Roles a node can be asked to play.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A requested mode for the role controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleMode {
    /// Discover peers and connect outward (central).
    Initiator,
    /// Advertise the service and accept one inbound connection (peripheral).
    Responder,
    /// Neither.
    Idle,
}

impl RoleMode {
    /// Short label used in user-facing log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Initiator => "Client",
            Self::Responder => "Server",
            Self::Idle => "None",
        }
    }
}

impl std::fmt::Display for RoleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown role mode: {0}")]
pub struct ParseRoleModeError(String);

impl std::str::FromStr for RoleMode {
    type Err = ParseRoleModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initiator" | "central" | "client" => Ok(Self::Initiator),
            "responder" | "peripheral" | "server" => Ok(Self::Responder),
            "idle" | "none" => Ok(Self::Idle),
            _ => Err(ParseRoleModeError(s.to_string())),
        }
    }
}
