//! Core of peerline.
//!
//! Implements the role state machine that keeps at most one of initiator or
//! responder active, the initiator's discovery/connection manager, the
//! single-shot responder listener, and the session channel that turns a
//! connected stream into newline-delimited text messages.

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod feed;
pub mod initiator;
pub mod registry;
pub mod responder;
pub mod session;
pub mod setup;
pub mod state;
mod task;

pub use config::Config;
pub use controller::RoleController;
pub use error::CoreError;
pub use event::{ConnectionOutcome, ControllerEvent};
pub use feed::{Direction, Feed, FeedEvent, LogFilter, LogLevel, LogLine};
pub use registry::DeviceRegistry;
pub use responder::ListenerState;
pub use session::SessionChannel;
pub use state::RoleState;
