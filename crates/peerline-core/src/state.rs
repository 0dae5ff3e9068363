//! Role state machine states.

use peerline_types::RoleMode;

/// Which role is currently active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoleState {
    /// Neither component running.
    #[default]
    Idle,
    /// Initiator: scanning and/or connected outward.
    Initiating,
    /// Responder: listening and/or serving one client.
    Responding,
}

impl RoleState {
    /// The state a successful switch to `mode` ends in.
    pub fn for_mode(mode: RoleMode) -> Self {
        match mode {
            RoleMode::Initiator => Self::Initiating,
            RoleMode::Responder => Self::Responding,
            RoleMode::Idle => Self::Idle,
        }
    }
}

impl std::fmt::Display for RoleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Initiating => write!(f, "Initiating"),
            Self::Responding => write!(f, "Responding"),
        }
    }
}
