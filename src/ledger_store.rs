use crate::context::ReconcileContext;
use crate::metrics;
use crate::model::{
    Direction, LedgerEntry, Payee, PaymentMethod, VerificationStatus, VerifiedBy, month_bucket,
};
use crate::persistence::redb_store::StoreError;
use crate::persistence::store::AppDataStore;
use crate::storage_keys::TRANSACTIONS;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_CONFIDENCE: u8 = 50;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Everything needed to commit a payment to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDraft {
    pub payee: Payee,
    pub amount: Decimal,
    pub category: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub method: PaymentMethod,
    /// Original intent time; becomes `created_at`.
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Created(LedgerEntry),
    /// An entry with the same idempotency key already existed; returned unchanged.
    Duplicate(LedgerEntry),
}

impl SaveOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            SaveOutcome::Created(e) | SaveOutcome::Duplicate(e) => e,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            SaveOutcome::Created(e) | SaveOutcome::Duplicate(e) => e,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SaveOutcome::Created(_))
    }
}

/// Verification fields written by `update_status`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: VerificationStatus,
    pub verified_by: VerifiedBy,
    pub confidence: Option<u8>,
    pub external_txn_id: Option<String>,
    pub notes: Option<String>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(status: VerificationStatus, verified_by: VerifiedBy) -> Self {
        Self {
            status,
            verified_by,
            confidence: None,
            external_txn_id: None,
            notes: None,
            returned_at: None,
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence.min(100));
        self
    }

    pub fn with_external_txn_id(mut self, txn_id: impl Into<String>) -> Self {
        self.external_txn_id = Some(txn_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_returned_at(mut self, at: DateTime<Utc>) -> Self {
        self.returned_at = Some(at);
        self
    }
}

/// General edit of a ledger entry. `id` and `created_at` are never editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerPatch {
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub note: Option<String>,
    pub direction: Option<Direction>,
    pub method: Option<PaymentMethod>,
    pub payee_external_id: Option<String>,
    pub payee_display_name: Option<String>,
}

pub struct LedgerStore {
    data: AppDataStore,
    ctx: ReconcileContext,
    write_lock: Mutex<()>,
}

impl LedgerStore {
    pub fn new(data: AppDataStore, ctx: ReconcileContext) -> Self {
        Self {
            data,
            ctx,
            write_lock: Mutex::new(()),
        }
    }

    fn load_all(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.data.load_list(TRANSACTIONS)
    }

    /// Commit a payment. A matching idempotency key short-circuits to the
    /// existing entry without writing.
    pub fn save(&self, draft: LedgerDraft) -> Result<SaveOutcome, LedgerError> {
        if draft.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(draft.amount));
        }

        let _guard = self.write_lock.lock();
        let mut list = self.load_all()?;

        if let Some(key) = draft.idempotency_key.as_deref() {
            if let Some(existing) = list
                .iter()
                .find(|e| e.idempotency_key.as_deref() == Some(key))
            {
                warn!(idempotency_key = %key, entry_id = %existing.id, "Duplicate commit detected - returning existing entry");
                metrics::inc_duplicate_commit();
                return Ok(SaveOutcome::Duplicate(existing.clone()));
            }
        }

        let created_at = draft.launched_at.unwrap_or_else(|| self.ctx.time.now());
        let entry = LedgerEntry {
            id: self.ctx.id.new_id(),
            amount: draft.amount,
            payee_external_id: draft.payee.external_id,
            payee_display_name: draft.payee.display_name,
            category: draft.category,
            direction: draft.direction,
            method: draft.method,
            note: draft.note,
            created_at,
            month: month_bucket(created_at),
            idempotency_key: draft.idempotency_key,
            status: VerificationStatus::Pending,
            confidence: DEFAULT_CONFIDENCE,
            verified_by: VerifiedBy::User,
            verified_at: None,
            launched_at: draft.launched_at,
            returned_at: None,
            external_txn_id: None,
            verification_notes: None,
        };

        list.insert(0, entry.clone());
        self.data.save(TRANSACTIONS, &list)?;

        info!(entry_id = %entry.id, amount = %entry.amount, category = %entry.category, "Ledger entry saved");
        Ok(SaveOutcome::Created(entry))
    }

    /// Update verification fields only. Returns false when the id is unknown
    /// or the write fails.
    pub fn update_status(&self, id: &str, update: StatusUpdate) -> bool {
        let _guard = self.write_lock.lock();

        let mut list = match self.load_all() {
            Ok(list) => list,
            Err(e) => {
                error!(entry_id = %id, "Failed to load ledger: {}", e);
                metrics::inc_storage_error();
                return false;
            }
        };

        let Some(entry) = list.iter_mut().find(|e| e.id == id) else {
            warn!(entry_id = %id, "Status update ignored: entry not found");
            return false;
        };

        entry.status = update.status;
        entry.verified_by = update.verified_by;
        entry.verified_at = Some(self.ctx.time.now());
        if let Some(confidence) = update.confidence {
            entry.confidence = confidence;
        }
        if let Some(txn_id) = update.external_txn_id {
            entry.external_txn_id = Some(txn_id);
        }
        if let Some(notes) = update.notes {
            entry.verification_notes = Some(notes);
        }
        if let Some(returned_at) = update.returned_at {
            entry.returned_at = Some(returned_at);
        }

        if let Err(e) = self.data.save(TRANSACTIONS, &list) {
            error!(entry_id = %id, "Failed to persist status update: {}", e);
            metrics::inc_storage_error();
            return false;
        }
        true
    }

    /// General field update. Returns Ok(None) when the id is unknown.
    pub fn update(&self, id: &str, patch: LedgerPatch) -> Result<Option<LedgerEntry>, LedgerError> {
        if let Some(amount) = patch.amount {
            if amount <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(amount));
            }
        }

        let _guard = self.write_lock.lock();
        let mut list = self.load_all()?;

        let Some(entry) = list.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };

        if let Some(amount) = patch.amount {
            entry.amount = amount;
        }
        if let Some(category) = patch.category {
            entry.category = category;
        }
        if let Some(note) = patch.note {
            entry.note = Some(note);
        }
        if let Some(direction) = patch.direction {
            entry.direction = direction;
        }
        if let Some(method) = patch.method {
            entry.method = method;
        }
        if let Some(external_id) = patch.payee_external_id {
            entry.payee_external_id = external_id;
        }
        if let Some(name) = patch.payee_display_name {
            entry.payee_display_name = name;
        }
        // Derived from the immutable creation time
        entry.month = month_bucket(entry.created_at);

        let updated = entry.clone();
        self.data.save(TRANSACTIONS, &list)?;
        Ok(Some(updated))
    }

    pub fn delete(&self, id: &str) -> bool {
        let _guard = self.write_lock.lock();

        let mut list = match self.load_all() {
            Ok(list) => list,
            Err(e) => {
                error!(entry_id = %id, "Failed to load ledger: {}", e);
                metrics::inc_storage_error();
                return false;
            }
        };

        let before = list.len();
        list.retain(|e| e.id != id);
        if list.len() == before {
            return false;
        }

        match self.data.save(TRANSACTIONS, &list) {
            Ok(()) => true,
            Err(e) => {
                error!(entry_id = %id, "Failed to persist deletion: {}", e);
                metrics::inc_storage_error();
                false
            }
        }
    }

    /// Wipe the entire ledger. Only reachable from an explicit user action.
    pub fn clear_all(&self) -> bool {
        let _guard = self.write_lock.lock();
        match self.data.remove(TRANSACTIONS) {
            Ok(_) => {
                warn!("Ledger cleared");
                true
            }
            Err(e) => {
                error!("Failed to clear ledger: {}", e);
                metrics::inc_storage_error();
                false
            }
        }
    }

    /// All entries, newest first.
    pub fn list(&self) -> Vec<LedgerEntry> {
        match self.load_all() {
            Ok(mut list) => {
                list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                list
            }
            Err(e) => {
                error!("Failed to load ledger: {}", e);
                metrics::inc_storage_error();
                Vec::new()
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<LedgerEntry> {
        self.list().into_iter().find(|e| e.id == id)
    }

    pub fn find_by_idempotency_key(&self, key: &str) -> Option<LedgerEntry> {
        self.list()
            .into_iter()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::redb_store::MemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_000_000;

    fn setup() -> LedgerStore {
        let (ctx, _clock) = ReconcileContext::new_simulated(T0);
        let data = AppDataStore::new(Arc::new(MemoryStore::new()), "@paytrack");
        LedgerStore::new(data, ctx)
    }

    fn draft(amount: Decimal, key: Option<&str>) -> LedgerDraft {
        LedgerDraft {
            payee: Payee::new("cafe@upi", "Cafe"),
            amount,
            category: "food".to_string(),
            note: Some("coffee".to_string()),
            direction: Direction::Expense,
            method: PaymentMethod::Upi,
            launched_at: None,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_duplicate_key_returns_first_entry() {
        let ledger = setup();
        let first = ledger.save(draft(dec!(250), Some("tr-1"))).unwrap();
        let second = ledger.save(draft(dec!(999), Some("tr-1"))).unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.entry().id, second.entry().id);

        let all = ledger.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].amount, dec!(250));
    }

    #[test]
    fn test_entries_without_key_are_not_deduplicated() {
        let ledger = setup();
        ledger.save(draft(dec!(10), None)).unwrap();
        ledger.save(draft(dec!(10), None)).unwrap();
        assert_eq!(ledger.list().len(), 2);
    }

    #[test]
    fn test_save_defaults_and_created_at_from_launch() {
        let ledger = setup();
        let launched = chrono::Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
        let mut d = draft(dec!(40), None);
        d.launched_at = Some(launched);

        let entry = ledger.save(d).unwrap().into_entry();
        assert_eq!(entry.status, VerificationStatus::Pending);
        assert_eq!(entry.confidence, 50);
        assert_eq!(entry.verified_by, VerifiedBy::User);
        assert_eq!(entry.created_at, launched);
        assert_eq!(entry.month, "2024-12");
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let ledger = setup();
        assert!(matches!(
            ledger.save(draft(dec!(0), None)),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_update_status_touches_verification_only() {
        let ledger = setup();
        let entry = ledger.save(draft(dec!(75), None)).unwrap().into_entry();

        let ok = ledger.update_status(
            &entry.id,
            StatusUpdate::new(VerificationStatus::Confirmed, VerifiedBy::Intent)
                .with_confidence(100)
                .with_external_txn_id("UPI123"),
        );
        assert!(ok);
        assert!(!ledger.update_status("missing", StatusUpdate::new(VerificationStatus::Failed, VerifiedBy::User)));

        let stored = ledger.get(&entry.id).unwrap();
        assert_eq!(stored.status, VerificationStatus::Confirmed);
        assert_eq!(stored.confidence, 100);
        assert_eq!(stored.external_txn_id.as_deref(), Some("UPI123"));
        assert!(stored.verified_at.is_some());
        assert_eq!(stored.amount, dec!(75));
    }

    #[test]
    fn test_update_keeps_id_and_created_at() {
        let ledger = setup();
        let entry = ledger.save(draft(dec!(75), None)).unwrap().into_entry();

        let patch = LedgerPatch {
            amount: Some(dec!(80)),
            category: Some("travel".to_string()),
            ..Default::default()
        };
        let updated = ledger.update(&entry.id, patch).unwrap().unwrap();
        assert_eq!(updated.id, entry.id);
        assert_eq!(updated.created_at, entry.created_at);
        assert_eq!(updated.month, entry.month);
        assert_eq!(updated.amount, dec!(80));
        assert_eq!(updated.category, "travel");

        assert!(ledger.update("missing", LedgerPatch::default()).unwrap().is_none());
    }

    #[test]
    fn test_delete_and_clear() {
        let ledger = setup();
        let a = ledger.save(draft(dec!(1), None)).unwrap().into_entry();
        ledger.save(draft(dec!(2), None)).unwrap();

        assert!(ledger.delete(&a.id));
        assert!(!ledger.delete(&a.id));
        assert_eq!(ledger.list().len(), 1);

        assert!(ledger.clear_all());
        assert!(ledger.list().is_empty());
    }
}
