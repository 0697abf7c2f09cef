//! Foreground/background observation.
//!
//! The host reports process lifecycle states; the bus collapses them into
//! active / not-active and fans each real transition out to independent
//! observers. The payment dwell timer and the security auto-lock share the
//! signal but keep their own timestamps and thresholds.

use crate::context::TimeProvider;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

impl AppState {
    pub fn is_active(&self) -> bool {
        matches!(self, AppState::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleSignal {
    /// The user came back after a payment hand-off.
    ResolutionCandidate { dwell_secs: f64 },
    /// The user was away long enough that the app must re-authenticate.
    LockRequired { away_secs: f64 },
}

pub trait LifecycleObserver: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_left(&self, now_ms: i64);
    fn on_returned(&self, now_ms: i64) -> Option<LifecycleSignal>;
}

fn elapsed_secs(from_ms: i64, to_ms: i64) -> f64 {
    (to_ms - from_ms).max(0) as f64 / 1000.0
}

/// Measures time spent in the external payment app. Only records while armed;
/// emitting a candidate disarms it.
#[derive(Default)]
pub struct PaymentDwellObserver {
    armed: AtomicBool,
    left_at: Mutex<Option<i64>>,
}

impl PaymentDwellObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
        debug!("Payment dwell observer armed");
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
        *self.left_at.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl LifecycleObserver for PaymentDwellObserver {
    fn name(&self) -> &'static str {
        "payment_dwell"
    }

    fn on_left(&self, now_ms: i64) {
        if self.is_armed() {
            *self.left_at.lock() = Some(now_ms);
        }
    }

    fn on_returned(&self, now_ms: i64) -> Option<LifecycleSignal> {
        let left_at = self.left_at.lock().take()?;
        self.armed.store(false, Ordering::SeqCst);

        let dwell_secs = elapsed_secs(left_at, now_ms);
        info!(dwell_secs, "Returned from external payment app");
        Some(LifecycleSignal::ResolutionCandidate { dwell_secs })
    }
}

/// Security auto-lock: requires re-authentication after a long absence.
pub struct AppLockObserver {
    timeout_secs: f64,
    enabled: AtomicBool,
    locked: AtomicBool,
    left_at: Mutex<Option<i64>>,
}

impl AppLockObserver {
    pub fn new(timeout_secs: f64) -> Self {
        Self {
            timeout_secs,
            enabled: AtomicBool::new(true),
            locked: AtomicBool::new(false),
            left_at: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let prev = self.enabled.swap(enabled, Ordering::SeqCst);
        if prev != enabled {
            info!(enabled, "App lock toggled");
        }
        if !enabled {
            self.locked.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

impl LifecycleObserver for AppLockObserver {
    fn name(&self) -> &'static str {
        "app_lock"
    }

    fn on_left(&self, now_ms: i64) {
        if self.enabled.load(Ordering::SeqCst) {
            *self.left_at.lock() = Some(now_ms);
        }
    }

    fn on_returned(&self, now_ms: i64) -> Option<LifecycleSignal> {
        let left_at = self.left_at.lock().take()?;
        let away_secs = elapsed_secs(left_at, now_ms);
        if away_secs < self.timeout_secs {
            return None;
        }
        self.locked.store(true, Ordering::SeqCst);
        warn!(away_secs, "🔒 App locked after absence");
        Some(LifecycleSignal::LockRequired { away_secs })
    }
}

/// Fans active/not-active transitions out to registered observers.
pub struct LifecycleBus {
    time: Arc<dyn TimeProvider>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    active: Mutex<bool>,
}

impl LifecycleBus {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            time,
            observers: Vec::new(),
            active: Mutex::new(true),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn LifecycleObserver>) {
        debug!(observer = observer.name(), "Lifecycle observer subscribed");
        self.observers.push(observer);
    }

    /// Report a host lifecycle state. Repeated states within the same bucket
    /// (e.g. inactive then background) are not transitions.
    pub fn dispatch(&self, state: AppState) -> Vec<LifecycleSignal> {
        let now_active = state.is_active();
        {
            let mut active = self.active.lock();
            if *active == now_active {
                return Vec::new();
            }
            *active = now_active;
        }

        let now_ms = self.time.now_millis();
        if now_active {
            self.observers
                .iter()
                .filter_map(|o| o.on_returned(now_ms))
                .collect()
        } else {
            for observer in &self.observers {
                observer.on_left(now_ms);
            }
            Vec::new()
        }
    }
}
