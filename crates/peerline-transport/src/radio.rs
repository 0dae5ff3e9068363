//! Radio enablement and permission access.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

/// The platform's radio power and permission flow.
///
/// Requests may involve the user (a system dialog, a settings toggle); they
/// resolve to whether the requirement is satisfied afterwards.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Whether the radio is powered on.
    fn is_enabled(&self) -> bool;

    /// Ask for the radio to be powered on.
    async fn request_enable(&self) -> bool;

    /// Whether every permission needed for discovery, connect and listen is
    /// granted.
    fn has_permissions(&self) -> bool;

    /// Ask for the missing permissions.
    async fn request_permissions(&self) -> bool;
}

/// A radio whose state is set programmatically.
///
/// Hosts without a permission model (the LAN backend) use
/// [`StaticRadio::ready`]; tests use the setters and request counters.
#[derive(Debug)]
pub struct StaticRadio {
    enabled: AtomicBool,
    permitted: AtomicBool,
    grant_requests: AtomicBool,
    enable_requests: AtomicU32,
    permission_requests: AtomicU32,
}

impl StaticRadio {
    pub fn new(enabled: bool, permitted: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            permitted: AtomicBool::new(permitted),
            grant_requests: AtomicBool::new(false),
            enable_requests: AtomicU32::new(0),
            permission_requests: AtomicU32::new(0),
        }
    }

    /// Enabled and permitted.
    pub fn ready() -> Self {
        Self::new(true, true)
    }

    /// Whether future requests are granted.
    pub fn set_grant_requests(&self, grant: bool) {
        self.grant_requests.store(grant, Ordering::SeqCst);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_permitted(&self, permitted: bool) {
        self.permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn enable_requests(&self) -> u32 {
        self.enable_requests.load(Ordering::SeqCst)
    }

    pub fn permission_requests(&self) -> u32 {
        self.permission_requests.load(Ordering::SeqCst)
    }
}

impl Default for StaticRadio {
    fn default() -> Self {
        Self::ready()
    }
}

#[async_trait]
impl Radio for StaticRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn request_enable(&self) -> bool {
        self.enable_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_requests.load(Ordering::SeqCst) {
            self.enabled.store(true, Ordering::SeqCst);
            info!("radio enabled");
        } else {
            debug!("radio enable request declined");
        }
        self.is_enabled()
    }

    fn has_permissions(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    async fn request_permissions(&self) -> bool {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.grant_requests.load(Ordering::SeqCst) {
            self.permitted.store(true, Ordering::SeqCst);
        } else {
            debug!("permission request declined");
        }
        self.has_permissions()
    }
}
