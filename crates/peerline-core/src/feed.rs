//! Presentation feed and logging sink.
//!
//! The presentation layer receives [`FeedEvent`]s: ordered device list
//! snapshots, log lines, role changes and chat messages. Every call here is
//! fire-and-forget; a full or closed feed never blocks the core.

use peerline_types::DeviceRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::state::RoleState;

/// Severity of a feed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Debug => "D",
            Self::Info => "I",
            Self::Warn => "W",
            Self::Error => "E",
        }
    }
}

/// Which log lines reach the presentation feed.
///
/// `Qa` hides debug lines; `tracing` still records everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFilter {
    #[default]
    Dev,
    Qa,
}

impl LogFilter {
    pub fn allows(self, level: LogLevel) -> bool {
        match self {
            Self::Dev => true,
            Self::Qa => level != LogLevel::Debug,
        }
    }
}

/// One user-visible log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub tag: &'static str,
    pub level: LogLevel,
    pub message: String,
}

impl std::fmt::Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level.tag(), self.message)
    }
}

/// Direction of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Outgoing => "Me",
            Self::Incoming => "Remote",
        }
    }
}

/// What the presentation layer is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Full device list, in discovery order.
    Devices(Vec<DeviceRecord>),
    Log(LogLine),
    Role(RoleState),
    Message { direction: Direction, text: String },
}

impl std::fmt::Display for FeedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Devices(devices) => write!(f, "{} device(s)", devices.len()),
            Self::Log(line) => write!(f, "{line}"),
            Self::Role(state) => write!(f, "role: {state}"),
            Self::Message { direction, text } => write!(f, "{}: {text}", direction.prefix()),
        }
    }
}

/// Handle onto the presentation feed. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    tx: Option<mpsc::Sender<FeedEvent>>,
    filter: LogFilter,
}

impl Feed {
    pub fn new(tx: mpsc::Sender<FeedEvent>, filter: LogFilter) -> Self {
        Self {
            tx: Some(tx),
            filter,
        }
    }

    /// A feed with no presentation attached; log lines still go to `tracing`.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Record a log line.
    pub fn log(&self, tag: &'static str, message: impl Into<String>, level: LogLevel) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(tag, "{message}"),
            LogLevel::Info => info!(tag, "{message}"),
            LogLevel::Warn => warn!(tag, "{message}"),
            LogLevel::Error => error!(tag, "{message}"),
        }
        if self.filter.allows(level) {
            self.emit(FeedEvent::Log(LogLine {
                tag,
                level,
                message,
            }));
        }
    }

    pub fn devices(&self, devices: Vec<DeviceRecord>) {
        self.emit(FeedEvent::Devices(devices));
    }

    pub fn role(&self, state: RoleState) {
        self.emit(FeedEvent::Role(state));
    }

    pub fn message(&self, direction: Direction, text: impl Into<String>) {
        self.emit(FeedEvent::Message {
            direction,
            text: text.into(),
        });
    }

    fn emit(&self, event: FeedEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                trace!(error = %e, "feed event dropped");
            }
        }
    }
}
