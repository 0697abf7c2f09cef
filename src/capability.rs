//! Host OS capabilities the reconciler treats as black boxes.

use crate::model::AppInfo;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

/// Launches external payment apps.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Hand `uri` to the OS, targeting `app_id` when given. Returns whether the
    /// OS accepted the launch.
    async fn launch_external_app(&self, app_id: Option<&str>, uri: &str) -> bool;

    async fn list_installed_candidate_apps(&self) -> Vec<AppInfo>;
}

/// Whether the host delivers foreground/background transitions at all.
pub trait FocusSignal: Send + Sync {
    fn available(&self) -> bool;
}

/// Host that reports lifecycle transitions.
pub struct HostFocusSignal;

impl FocusSignal for HostFocusSignal {
    fn available(&self) -> bool {
        true
    }
}

/// Fallback for hosts without focus events: the reconciler prompts right after
/// launch instead of waiting for a return.
pub struct NoFocusSignal;

impl FocusSignal for NoFocusSignal {
    fn available(&self) -> bool {
        false
    }
}

/// Launcher for headless hosts. Records launches instead of opening anything.
#[derive(Default)]
pub struct NoopLauncher {
    apps: Vec<AppInfo>,
    launched: Mutex<Vec<(Option<String>, String)>>,
    refuse: bool,
}

impl NoopLauncher {
    pub fn new(apps: Vec<AppInfo>) -> Self {
        Self {
            apps,
            launched: Mutex::new(Vec::new()),
            refuse: false,
        }
    }

    /// A launcher whose every launch is rejected by the "OS".
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn launched(&self) -> Vec<(Option<String>, String)> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl AppLauncher for NoopLauncher {
    async fn launch_external_app(&self, app_id: Option<&str>, uri: &str) -> bool {
        if self.refuse {
            warn!(app_id = ?app_id, "Launch refused");
            return false;
        }
        self.launched
            .lock()
            .push((app_id.map(str::to_string), uri.to_string()));
        true
    }

    async fn list_installed_candidate_apps(&self) -> Vec<AppInfo> {
        self.apps.clone()
    }
}
