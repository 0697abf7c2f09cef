use crate::metrics;
use crate::model::UserPatterns;
use crate::persistence::store::AppDataStore;
use crate::storage_keys::{PREFERRED_EXTERNAL_APP, USER_PATTERNS};
use parking_lot::Mutex;
use tracing::{debug, error};

/// Persistence for the process-wide `UserPatterns` aggregate and the
/// preferred payment app.
pub struct PatternStore {
    data: AppDataStore,
    write_lock: Mutex<()>,
}

impl PatternStore {
    pub fn new(data: AppDataStore) -> Self {
        Self {
            data,
            write_lock: Mutex::new(()),
        }
    }

    /// Current patterns; neutral defaults when nothing is stored yet or the
    /// read fails.
    pub fn load(&self) -> UserPatterns {
        match self.data.load::<UserPatterns>(USER_PATTERNS) {
            Ok(Some(patterns)) => patterns,
            Ok(None) => UserPatterns::default(),
            Err(e) => {
                error!("Failed to load user patterns: {}", e);
                metrics::inc_storage_error();
                UserPatterns::default()
            }
        }
    }

    /// Fold one resolved payment into the stored aggregate.
    pub fn record(&self, confirmed: bool, dwell_secs: Option<f64>) -> UserPatterns {
        let _guard = self.write_lock.lock();

        let mut patterns = self.load();
        patterns.record(confirmed, dwell_secs);

        if let Err(e) = self.data.save(USER_PATTERNS, &patterns) {
            error!("Failed to persist user patterns: {}", e);
            metrics::inc_storage_error();
        } else {
            debug!(
                total = patterns.total_payments,
                success_rate = patterns.success_rate,
                avg_dwell = patterns.avg_time_in_external_app,
                "User patterns updated"
            );
        }
        patterns
    }

    pub fn preferred_app(&self) -> Option<String> {
        match self.data.load::<String>(PREFERRED_EXTERNAL_APP) {
            Ok(app) => app,
            Err(e) => {
                error!("Failed to load preferred app: {}", e);
                metrics::inc_storage_error();
                None
            }
        }
    }

    pub fn set_preferred_app(&self, app_id: &str) -> bool {
        match self.data.save(PREFERRED_EXTERNAL_APP, app_id) {
            Ok(()) => true,
            Err(e) => {
                error!(app_id = %app_id, "Failed to persist preferred app: {}", e);
                metrics::inc_storage_error();
                false
            }
        }
    }
}
