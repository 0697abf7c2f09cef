//! Shared reconciliation context.
//!
//! Owned by the reconciler and handed to the deep-link handler at construction.
//! Holds the stores, the in-memory map of outstanding intents and the event
//! channel, plus the two resolution primitives (commit and discard) that every
//! signal path funnels through. Both primitives are idempotent: the pending
//! store only transitions an intent once and the ledger deduplicates on the
//! intent id.

use crate::context::ReconcileContext;
use crate::intent_fsm::{IntentFsm, ReconcileState};
use crate::ledger_store::{LedgerDraft, LedgerError, LedgerStore, SaveOutcome, StatusUpdate};
use crate::metrics;
use crate::model::{
    Direction, IntentStatus, PaymentIntent, PaymentMethod, UserPatterns, VerificationStatus,
    VerifiedBy,
};
use crate::pending_store::PendingStore;
use crate::reconciler::ConfirmationPrompt;
use crate::user_patterns::PatternStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications for the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileEvent {
    PromptRequested { prompt: ConfirmationPrompt },
    LedgerChanged { entry_id: String },
    PendingChanged { intent_id: String },
    RecoveryRequired { intents: Vec<PaymentIntent> },
    LockRequired { away_secs: f64 },
}

/// An intent launched during this process lifetime.
#[derive(Debug, Clone)]
pub struct TrackedIntent {
    pub intent: PaymentIntent,
    pub fsm: IntentFsm,
    pub launched_at: DateTime<Utc>,
    /// The payment app was asked to call back with `tr=<intent id>`.
    pub trackable: bool,
    pub failed: bool,
}

/// How a confirmed payment was established.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub verified_by: VerifiedBy,
    pub confidence: u8,
    pub dwell_secs: Option<f64>,
    pub returned_at: Option<DateTime<Utc>>,
    pub external_txn_id: Option<String>,
    pub notes: Option<String>,
}

pub struct ReconcileSession {
    pub ctx: ReconcileContext,
    pub pending: PendingStore,
    pub ledger: LedgerStore,
    pub patterns: PatternStore,
    outstanding: Mutex<HashMap<String, TrackedIntent>>,
    events: broadcast::Sender<ReconcileEvent>,
}

impl ReconcileSession {
    pub fn new(
        ctx: ReconcileContext,
        pending: PendingStore,
        ledger: LedgerStore,
        patterns: PatternStore,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ctx,
            pending,
            ledger,
            patterns,
            outstanding: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: ReconcileEvent) {
        // No subscribers is fine
        if self.events.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.ctx.time.now_millis()
    }

    // --- Outstanding intents ---

    pub fn track(&self, intent: PaymentIntent, trackable: bool) {
        let tracked = TrackedIntent {
            fsm: IntentFsm::new(intent.id.clone()),
            launched_at: self.ctx.time.now(),
            trackable,
            failed: false,
            intent,
        };
        self.outstanding
            .lock()
            .insert(tracked.intent.id.clone(), tracked);
    }

    pub fn tracked(&self, intent_id: &str) -> Option<TrackedIntent> {
        self.outstanding.lock().get(intent_id).cloned()
    }

    pub fn untrack(&self, intent_id: &str) -> Option<TrackedIntent> {
        self.outstanding.lock().remove(intent_id)
    }

    /// Apply a transition to a tracked intent's FSM. Untracked ids (e.g. after
    /// a restart) are ignored.
    pub fn transition(&self, intent_id: &str, next: ReconcileState, reason: Option<String>) {
        let now = self.now_ms();
        if let Some(tracked) = self.outstanding.lock().get_mut(intent_id) {
            if let Err(e) = tracked.fsm.transition(next, now, reason) {
                debug!(intent_id = %intent_id, "FSM transition skipped: {}", e);
            }
        }
    }

    /// Walk a tracked FSM forward through Resolving into a terminal state.
    fn settle(&self, intent_id: &str, terminal: ReconcileState, reason: &str) {
        let now = self.now_ms();
        let mut outstanding = self.outstanding.lock();
        let Some(tracked) = outstanding.get_mut(intent_id) else {
            return;
        };

        loop {
            let next = match tracked.fsm.state {
                ReconcileState::Created => ReconcileState::AwaitingReturn,
                ReconcileState::AwaitingReturn => ReconcileState::Resolving,
                _ => break,
            };
            if tracked.fsm.transition(next, now, None).is_err() {
                return;
            }
        }

        if !tracked.fsm.is_terminal() {
            let _ = tracked.fsm.transition(terminal, now, Some(reason.to_string()));
        }
    }

    // --- Resolution primitives ---

    /// Commit a confirmed payment to the ledger and close the pending entry.
    /// Safe to call repeatedly for the same intent.
    pub fn commit_confirmed(
        &self,
        intent: &PaymentIntent,
        confirmation: Confirmation,
    ) -> Result<SaveOutcome, LedgerError> {
        let draft = LedgerDraft {
            payee: intent.payee.clone(),
            amount: intent.amount,
            category: intent.category.clone(),
            note: intent.note.clone(),
            direction: Direction::Expense,
            method: PaymentMethod::Upi,
            launched_at: Some(intent.created_at),
            idempotency_key: Some(intent.id.clone()),
        };

        let outcome = self.ledger.save(draft)?;

        let outcome = match outcome {
            SaveOutcome::Created(entry) => {
                let mut update =
                    StatusUpdate::new(VerificationStatus::Confirmed, confirmation.verified_by)
                        .with_confidence(confirmation.confidence);
                if let Some(at) = confirmation.returned_at {
                    update = update.with_returned_at(at);
                }
                if let Some(txn_id) = confirmation.external_txn_id.clone() {
                    update = update.with_external_txn_id(txn_id);
                }
                if let Some(notes) = confirmation.notes.clone() {
                    update = update.with_notes(notes);
                }
                if !self.ledger.update_status(&entry.id, update) {
                    error!(entry_id = %entry.id, "Ledger entry saved but verification not recorded");
                }

                let verified_by = format!("{:?}", confirmation.verified_by).to_lowercase();
                metrics::inc_ledger_commit(&verified_by);
                info!(
                    intent_id = %intent.id,
                    entry_id = %entry.id,
                    verified_by = %verified_by,
                    confidence = confirmation.confidence,
                    "Payment committed to ledger"
                );
                let refreshed = self.ledger.get(&entry.id).unwrap_or(entry);
                SaveOutcome::Created(refreshed)
            }
            duplicate => duplicate,
        };

        if self.pending.resolve_pending(&intent.id, IntentStatus::Confirmed) {
            self.patterns.record(true, confirmation.dwell_secs);
        }

        self.settle(&intent.id, ReconcileState::Committed, "confirmed");
        self.untrack(&intent.id);

        self.emit(ReconcileEvent::LedgerChanged {
            entry_id: outcome.entry().id.clone(),
        });
        self.emit(ReconcileEvent::PendingChanged {
            intent_id: intent.id.clone(),
        });
        Ok(outcome)
    }

    /// Close a pending intent without a ledger entry. Returns whether this call
    /// performed the resolution.
    pub fn discard(&self, intent_id: &str, dwell_secs: Option<f64>, reason: &str) -> bool {
        let resolved = self.pending.resolve_pending(intent_id, IntentStatus::Cancelled);
        if resolved {
            self.patterns.record(false, dwell_secs);
            info!(intent_id = %intent_id, reason = %reason, "Payment discarded");
            self.emit(ReconcileEvent::PendingChanged {
                intent_id: intent_id.to_string(),
            });
        }
        self.settle(intent_id, ReconcileState::Discarded, reason);
        resolved
    }

    /// Mark a tracked intent failed (callback reported failure).
    pub fn mark_failed(&self, intent_id: &str) {
        if let Some(tracked) = self.outstanding.lock().get_mut(intent_id) {
            tracked.failed = true;
        }
    }

    pub fn user_patterns(&self) -> UserPatterns {
        self.patterns.load()
    }
}
