//! Device environment collaborators: auth, connectivity, data usage.

use kata_model::UserId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Supplies the currently authenticated user.
pub trait AuthGateway: Send + Sync {
    /// The signed-in user, if any. Queue drains are scoped to this user.
    fn current_user(&self) -> Option<UserId>;
}

/// Connectivity classes the policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClass {
    /// Unmetered connection.
    Wifi,
    /// Metered mobile connection.
    Cellular,
}

/// Reports current device connectivity.
pub trait NetworkObserver: Send + Sync {
    /// Whether the device currently has connectivity.
    fn is_connected(&self) -> bool;

    /// The class of the current connection.
    fn connection_class(&self) -> ConnectionClass;
}

/// Media quality levels a user can prefer on metered connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaQuality {
    /// Smallest transfers.
    Low,
    /// Balanced.
    Medium,
    /// Full quality.
    High,
}

/// User-configured data usage limits gating sync runs.
pub trait DataUsagePolicy: Send + Sync {
    /// Whether a sync run is permitted on the given connection.
    fn sync_allowed(&self, class: ConnectionClass) -> bool;

    /// Preferred media quality for downloads.
    fn media_quality(&self) -> MediaQuality;

    /// Whether media preloading is restricted to wifi.
    fn preload_on_wifi_only(&self) -> bool;
}

/// Fixed-answer auth gateway for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticAuth {
    user: RwLock<Option<UserId>>,
}

impl StaticAuth {
    /// Creates a gateway with `user` signed in.
    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    /// Creates a gateway with nobody signed in.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Signs a user in.
    pub fn sign_in(&self, user: UserId) {
        *self.user.write() = Some(user);
    }

    /// Signs the current user out.
    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl AuthGateway for StaticAuth {
    fn current_user(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}

/// Settable network observer for embedding and tests.
#[derive(Debug)]
pub struct StaticNetwork {
    connected: AtomicBool,
    class: RwLock<ConnectionClass>,
}

impl StaticNetwork {
    /// Creates an observer reporting a connected wifi device.
    #[must_use]
    pub fn wifi() -> Self {
        Self {
            connected: AtomicBool::new(true),
            class: RwLock::new(ConnectionClass::Wifi),
        }
    }

    /// Creates an observer reporting a connected cellular device.
    #[must_use]
    pub fn cellular() -> Self {
        Self {
            connected: AtomicBool::new(true),
            class: RwLock::new(ConnectionClass::Cellular),
        }
    }

    /// Flips connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Changes the reported connection class.
    pub fn set_class(&self, class: ConnectionClass) {
        *self.class.write() = class;
    }
}

impl NetworkObserver for StaticNetwork {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_class(&self) -> ConnectionClass {
        *self.class.read()
    }
}

/// Configurable data usage policy.
#[derive(Debug)]
pub struct StaticPolicy {
    sync_enabled: AtomicBool,
    cellular_sync: AtomicBool,
    quality: RwLock<MediaQuality>,
    preload_wifi_only: AtomicBool,
}

impl StaticPolicy {
    /// Creates a policy allowing sync on any connection.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            sync_enabled: AtomicBool::new(true),
            cellular_sync: AtomicBool::new(true),
            quality: RwLock::new(MediaQuality::High),
            preload_wifi_only: AtomicBool::new(false),
        }
    }

    /// Creates a policy blocking all sync.
    #[must_use]
    pub fn blocked() -> Self {
        let policy = Self::permissive();
        policy.sync_enabled.store(false, Ordering::SeqCst);
        policy
    }

    /// Enables or disables sync entirely.
    pub fn set_sync_enabled(&self, enabled: bool) {
        self.sync_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Enables or disables sync over cellular connections.
    pub fn set_cellular_sync(&self, enabled: bool) {
        self.cellular_sync.store(enabled, Ordering::SeqCst);
    }

    /// Sets the preferred media quality.
    pub fn set_media_quality(&self, quality: MediaQuality) {
        *self.quality.write() = quality;
    }

    /// Restricts media preloading to wifi.
    pub fn set_preload_on_wifi_only(&self, wifi_only: bool) {
        self.preload_wifi_only.store(wifi_only, Ordering::SeqCst);
    }
}

impl DataUsagePolicy for StaticPolicy {
    fn sync_allowed(&self, class: ConnectionClass) -> bool {
        if !self.sync_enabled.load(Ordering::SeqCst) {
            return false;
        }
        match class {
            ConnectionClass::Wifi => true,
            ConnectionClass::Cellular => self.cellular_sync.load(Ordering::SeqCst),
        }
    }

    fn media_quality(&self) -> MediaQuality {
        *self.quality.read()
    }

    fn preload_on_wifi_only(&self) -> bool {
        self.preload_wifi_only.load(Ordering::SeqCst)
    }
}
