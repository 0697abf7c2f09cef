//! Bounded, durable queue of payment intents awaiting resolution.
//!
//! Expiry is lazy: an entry older than the TTL is filtered out by every reader
//! but its stored record is left as-is. Not-found on resolve/delete is a no-op
//! because several resolution signals may race for the same intent.

use crate::config::ReconcileConfig;
use crate::context::ReconcileContext;
use crate::metrics;
use crate::model::{IntentStatus, PaymentIntent};
use crate::persistence::redb_store::StoreError;
use crate::persistence::store::AppDataStore;
use crate::storage_keys::PENDING_TRANSACTIONS;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

pub struct PendingStore {
    data: AppDataStore,
    ctx: ReconcileContext,
    max_pending: usize,
    ttl_ms: i64,
    // Serializes read-modify-write of the stored list
    write_lock: Mutex<()>,
}

impl PendingStore {
    pub fn new(data: AppDataStore, ctx: ReconcileContext, cfg: &ReconcileConfig) -> Self {
        Self {
            data,
            ctx,
            max_pending: cfg.max_pending,
            ttl_ms: cfg.pending_ttl_millis(),
            write_lock: Mutex::new(()),
        }
    }

    fn load_all(&self) -> Result<Vec<PaymentIntent>, StoreError> {
        self.data.load_list(PENDING_TRANSACTIONS)
    }

    fn is_visible(&self, intent: &PaymentIntent) -> bool {
        intent.is_pending() && intent.age_millis(self.ctx.time.now()) < self.ttl_ms
    }

    fn publish_gauge(&self, list: &[PaymentIntent]) {
        let visible = list.iter().filter(|i| self.is_visible(i)).count();
        metrics::set_pending_intents(visible as i64);
    }

    /// Insert at the head and keep only the most recent `max_pending` entries.
    pub fn save_pending(&self, intent: PaymentIntent) -> bool {
        let _guard = self.write_lock.lock();

        let mut list = match self.load_all() {
            Ok(list) => list,
            Err(e) => {
                error!(intent_id = %intent.id, "Failed to load pending list: {}", e);
                metrics::inc_storage_error();
                return false;
            }
        };

        list.retain(|existing| existing.id != intent.id);
        let intent_id = intent.id.clone();
        list.insert(0, intent);

        if list.len() > self.max_pending {
            let evicted = list.split_off(self.max_pending);
            for dropped in &evicted {
                info!(intent_id = %dropped.id, status = %dropped.status, "Pending intent evicted by size bound");
            }
            metrics::inc_pending_evicted(evicted.len() as u64);
        }

        if let Err(e) = self.data.save(PENDING_TRANSACTIONS, &list) {
            error!(intent_id = %intent_id, "Failed to persist pending intent: {}", e);
            metrics::inc_storage_error();
            return false;
        }

        self.publish_gauge(&list);
        debug!(intent_id = %intent_id, size = list.len(), "Pending intent saved");
        true
    }

    /// Live pending intents (status pending, younger than the TTL), most recent first.
    pub fn get_pendings(&self) -> Vec<PaymentIntent> {
        let list = match self.load_all() {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to load pending list: {}", e);
                metrics::inc_storage_error();
                return Vec::new();
            }
        };

        let mut visible: Vec<PaymentIntent> =
            list.into_iter().filter(|i| self.is_visible(i)).collect();
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        visible
    }

    /// A single live pending intent, if it is still unresolved and unexpired.
    pub fn get_pending(&self, id: &str) -> Option<PaymentIntent> {
        self.get_pendings().into_iter().find(|i| i.id == id)
    }

    /// Move a pending intent to a terminal status.
    ///
    /// Returns true only when this call performed the transition. Unknown ids,
    /// already-terminal entries and lazily expired entries are left untouched.
    pub fn resolve_pending(&self, id: &str, status: IntentStatus) -> bool {
        if !status.is_terminal() {
            warn!(intent_id = %id, "Refusing to resolve intent back to pending");
            return false;
        }

        let _guard = self.write_lock.lock();

        let mut list = match self.load_all() {
            Ok(list) => list,
            Err(e) => {
                error!(intent_id = %id, "Failed to load pending list: {}", e);
                metrics::inc_storage_error();
                return false;
            }
        };

        let now = self.ctx.time.now();
        let Some(entry) = list.iter_mut().find(|i| i.id == id) else {
            debug!(intent_id = %id, "Resolve ignored: intent not found");
            return false;
        };

        if entry.status.is_terminal() {
            info!(intent_id = %id, current = %entry.status, requested = %status, "Resolve ignored: intent already resolved");
            return false;
        }
        if entry.age_millis(now) >= self.ttl_ms {
            info!(intent_id = %id, "Resolve ignored: intent expired");
            return false;
        }

        entry.status = status;

        if let Err(e) = self.data.save(PENDING_TRANSACTIONS, &list) {
            error!(intent_id = %id, "Failed to persist pending resolution: {}", e);
            metrics::inc_storage_error();
            return false;
        }

        self.publish_gauge(&list);
        info!(intent_id = %id, status = %status, "Pending intent resolved");
        true
    }

    /// Hard-remove an entry regardless of status.
    pub fn delete_pending(&self, id: &str) -> bool {
        let _guard = self.write_lock.lock();

        let mut list = match self.load_all() {
            Ok(list) => list,
            Err(e) => {
                error!(intent_id = %id, "Failed to load pending list: {}", e);
                metrics::inc_storage_error();
                return false;
            }
        };

        let before = list.len();
        list.retain(|i| i.id != id);
        if list.len() == before {
            return false;
        }

        if let Err(e) = self.data.save(PENDING_TRANSACTIONS, &list) {
            error!(intent_id = %id, "Failed to persist pending deletion: {}", e);
            metrics::inc_storage_error();
            return false;
        }

        self.publish_gauge(&list);
        true
    }
}
