//! Node configuration loaded from TOML.

use std::net::IpAddr;
use std::time::Duration;

use peerline_transport::LanOptions;
use peerline_types::{PeerInfo, ServiceId};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::feed::LogFilter;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    /// Peers treated as bonded: reported first on every scan.
    #[serde(default)]
    pub paired: Vec<PairedPeer>,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_filter: LogFilter,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_filter: LogFilter::default(),
        }
    }
}

/// LAN transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            listen_port: default_listen_port(),
            discovery_port: default_discovery_port(),
        }
    }
}

/// The service a responder advertises and an initiator connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub uuid: ServiceId,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            uuid: ServiceId::default(),
        }
    }
}

/// Scan and connect timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_scan_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// A bonded peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedPeer {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Config {
    /// Settings for the LAN transport backend.
    pub fn lan_options(&self) -> Result<LanOptions, CoreError> {
        let bind: IpAddr = self.transport.bind.parse().map_err(|e| {
            CoreError::Config(format!("invalid bind address {:?}: {e}", self.transport.bind))
        })?;
        Ok(LanOptions {
            bind,
            listen_port: self.transport.listen_port,
            discovery_port: self.transport.discovery_port,
            node_name: self.node.name.clone(),
            service: self.service.uuid,
            paired: self
                .paired
                .iter()
                .map(|p| PeerInfo::new(p.address.as_str(), p.name.clone()))
                .collect(),
        })
    }
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "peerline".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    30500
}

fn default_discovery_port() -> u16 {
    30501
}

fn default_service_name() -> String {
    "BTServer".to_string()
}

fn default_scan_timeout_secs() -> u64 {
    15
}

fn default_connect_timeout_secs() -> u64 {
    20
}
