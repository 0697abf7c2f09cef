//! Payment reconciliation orchestrator.
//!
//! Launches payment apps, watches for the user's return, asks them what
//! happened and commits the answer. Three signals can resolve the same intent
//! (a payment-app callback, the user's answer to a prompt and recovery after a
//! restart). They race freely: every path re-validates against the pending
//! store and the ledger deduplicates on the intent id, so whichever lands first
//! wins and the rest become no-ops.

use crate::capability::{AppLauncher, FocusSignal};
use crate::config::ReconcileConfig;
use crate::context::ReconcileContext;
use crate::deep_link::{DeepLinkHandler, DeepLinkOutcome};
use crate::intent_fsm::ReconcileState;
use crate::ledger_store::{LedgerError, LedgerStore};
use crate::lifecycle::{AppLockObserver, AppState, LifecycleBus, LifecycleSignal, PaymentDwellObserver};
use crate::metrics;
use crate::model::{AppInfo, IntentStatus, LedgerEntry, Payee, PaymentIntent, UserPatterns, VerifiedBy};
use crate::pending_store::PendingStore;
use crate::persistence::redb_store::StoreError;
use crate::persistence::store::AppDataStore;
use crate::scorer::{self, QuickReturn, SuggestedAction};
use crate::session::{Confirmation, ReconcileEvent, ReconcileSession};
use crate::upi_uri::{PaymentLink, build_payment_uri};
use crate::user_patterns::PatternStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub const DEFAULT_CATEGORY: &str = "Other";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("Payee address is required")]
    MissingPayee,
    #[error("Could not record pending payment {0}")]
    PendingNotSaved(String),
    #[error("Payment app refused to launch (app: {app_id:?})")]
    LaunchFailed { app_id: Option<String> },
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// What the user asked to pay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payee: Payee,
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Target app; falls back to the remembered preference.
    #[serde(default)]
    pub app_id: Option<String>,
    /// Whether the target app is known to call back with a `tr` reference.
    #[serde(default)]
    pub supports_callback: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedPayment {
    pub intent: PaymentIntent,
    pub uri: String,
    pub trackable: bool,
    /// Set when the host has no focus signal and the prompt is raised at once.
    pub prompt: Option<ConfirmationPrompt>,
}

/// A question put to the user after they return from a payment app.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPrompt {
    pub intent_id: String,
    pub payee_display_name: String,
    pub amount: Decimal,
    /// Absent for prompts raised without a measured return.
    pub dwell_secs: Option<f64>,
    pub quick_return: Option<QuickReturn>,
    pub confidence: f64,
    pub suggested_action: SuggestedAction,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptResponse {
    Paid,
    Failed,
    Cancelled,
    NotSure,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Committed { entry: LedgerEntry, duplicate: bool },
    Discarded { intent_id: String },
    /// "Not sure": left pending for later.
    Deferred { intent_id: String },
    /// Another signal resolved (or expiry hid) the intent first.
    AlreadyResolved { intent_id: String },
}

/// Result of reporting a host lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnOutcome {
    Idle,
    /// A sub-threshold focus flicker; the dwell observer stays armed.
    Suppressed { dwell_secs: f64 },
    Prompt { prompt: ConfirmationPrompt },
    AlreadyResolved { intent_id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum RecoveryRoute {
    Normal,
    Recovery { intents: Vec<PaymentIntent> },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConfirmReport {
    pub committed: Vec<LedgerEntry>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Reconciler {
    session: Arc<ReconcileSession>,
    deep_links: DeepLinkHandler,
    bus: LifecycleBus,
    dwell: Arc<PaymentDwellObserver>,
    lock: Arc<AppLockObserver>,
    launcher: Arc<dyn AppLauncher>,
    focus: Arc<dyn FocusSignal>,
    data: AppDataStore,
    cfg: ReconcileConfig,
    awaiting: Mutex<Option<String>>,
    prompts: Mutex<HashMap<String, ConfirmationPrompt>>,
}

impl Reconciler {
    pub fn new(
        ctx: ReconcileContext,
        data: AppDataStore,
        cfg: ReconcileConfig,
        launcher: Arc<dyn AppLauncher>,
        focus: Arc<dyn FocusSignal>,
    ) -> Self {
        let session = Arc::new(ReconcileSession::new(
            ctx.clone(),
            PendingStore::new(data.clone(), ctx.clone(), &cfg),
            LedgerStore::new(data.clone(), ctx.clone()),
            PatternStore::new(data.clone()),
        ));

        let dwell = Arc::new(PaymentDwellObserver::new());
        let lock = Arc::new(AppLockObserver::new(cfg.app_lock_timeout_secs));
        let mut bus = LifecycleBus::new(ctx.time.clone());
        bus.subscribe(dwell.clone());
        bus.subscribe(lock.clone());

        Self {
            deep_links: DeepLinkHandler::new(session.clone(), cfg.clone()),
            session,
            bus,
            dwell,
            lock,
            launcher,
            focus,
            data,
            cfg,
            awaiting: Mutex::new(None),
            prompts: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReconcileEvent> {
        self.session.subscribe()
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.session.ledger
    }

    pub fn pending(&self) -> &PendingStore {
        &self.session.pending
    }

    pub fn patterns(&self) -> UserPatterns {
        self.session.user_patterns()
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.cfg
    }

    // --- Launch ---

    pub async fn candidate_apps(&self) -> Vec<AppInfo> {
        self.launcher.list_installed_candidate_apps().await
    }

    /// Record a pending intent, then hand the payment to an external app.
    pub async fn start_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<StartedPayment, ReconcileError> {
        // Stored and encoded amounts carry two decimals
        let amount = request.amount.round_dp(2);
        if amount <= Decimal::ZERO {
            return Err(ReconcileError::InvalidAmount(request.amount));
        }
        if request.payee.external_id.trim().is_empty() {
            return Err(ReconcileError::MissingPayee);
        }

        let ctx = &self.session.ctx;
        let app_id = request
            .app_id
            .clone()
            .or_else(|| self.session.patterns.preferred_app());

        let intent = PaymentIntent {
            id: ctx.id.new_id(),
            payee: request.payee,
            amount,
            note: request.note.filter(|n| !n.trim().is_empty()),
            category: request
                .category
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            created_at: ctx.time.now(),
            launched_app: app_id.clone(),
            status: IntentStatus::Pending,
        };

        // Persist before leaving the app so a killed process can recover it
        if !self.session.pending.save_pending(intent.clone()) {
            return Err(ReconcileError::PendingNotSaved(intent.id));
        }

        let trackable = request.supports_callback;
        self.session.track(intent.clone(), trackable);

        let uri = build_payment_uri(
            &PaymentLink {
                payee: intent.payee.clone(),
                amount: Some(intent.amount),
                currency: None,
                note: intent.note.clone(),
                transaction_ref: trackable.then(|| intent.id.clone()),
            },
            &self.cfg.currency,
        );

        let has_focus_signal = self.focus.available();
        if has_focus_signal {
            self.dwell.arm();
        }
        *self.awaiting.lock() = Some(intent.id.clone());

        if !self
            .launcher
            .launch_external_app(app_id.as_deref(), &uri)
            .await
        {
            warn!(intent_id = %intent.id, app_id = ?app_id, "Launch refused, dropping intent");
            self.dwell.disarm();
            self.clear_awaiting(&intent.id);
            self.session
                .transition(&intent.id, ReconcileState::Discarded, Some("launch refused".into()));
            self.session.untrack(&intent.id);
            self.session.pending.delete_pending(&intent.id);
            return Err(ReconcileError::LaunchFailed { app_id });
        }

        self.session
            .transition(&intent.id, ReconcileState::AwaitingReturn, None);
        metrics::inc_payments_started();
        if let Some(app) = app_id.as_deref() {
            self.session.patterns.set_preferred_app(app);
        }
        info!(
            intent_id = %intent.id,
            amount = %intent.amount,
            app_id = ?app_id,
            trackable,
            "Payment launched"
        );

        let prompt = if has_focus_signal {
            None
        } else {
            self.clear_awaiting(&intent.id);
            self.session
                .transition(&intent.id, ReconcileState::Resolving, None);
            Some(self.raise_prompt(&intent, None))
        };

        Ok(StartedPayment {
            intent,
            uri,
            trackable,
            prompt,
        })
    }

    // --- Return detection ---

    /// Report a host lifecycle state change.
    pub fn on_app_state_change(&self, state: AppState) -> ReturnOutcome {
        let mut outcome = ReturnOutcome::Idle;
        for signal in self.bus.dispatch(state) {
            match signal {
                LifecycleSignal::ResolutionCandidate { dwell_secs } => {
                    outcome = self.handle_return(dwell_secs);
                }
                LifecycleSignal::LockRequired { away_secs } => {
                    self.session.emit(ReconcileEvent::LockRequired { away_secs });
                }
            }
        }
        outcome
    }

    fn handle_return(&self, dwell_secs: f64) -> ReturnOutcome {
        let Some(intent_id) = self.awaiting.lock().clone() else {
            return ReturnOutcome::Idle;
        };
        metrics::observe_dwell(dwell_secs);

        if !scorer::should_prompt(dwell_secs) {
            info!(intent_id = %intent_id, dwell_secs, "Focus flicker, prompt suppressed");
            metrics::inc_prompt_suppressed();
            self.dwell.arm();
            return ReturnOutcome::Suppressed { dwell_secs };
        }

        self.clear_awaiting(&intent_id);

        let Some(intent) = self.session.pending.get_pending(&intent_id) else {
            info!(intent_id = %intent_id, "Returned after intent was already resolved");
            return ReturnOutcome::AlreadyResolved { intent_id };
        };

        self.session
            .transition(&intent_id, ReconcileState::Resolving, None);
        ReturnOutcome::Prompt {
            prompt: self.raise_prompt(&intent, Some(dwell_secs)),
        }
    }

    fn clear_awaiting(&self, intent_id: &str) {
        let mut awaiting = self.awaiting.lock();
        if awaiting.as_deref() == Some(intent_id) {
            *awaiting = None;
        }
    }

    fn raise_prompt(&self, intent: &PaymentIntent, dwell_secs: Option<f64>) -> ConfirmationPrompt {
        let (confidence, suggested_action, message, quick) = match dwell_secs {
            Some(dwell) => {
                let patterns = self.session.user_patterns();
                let score = scorer::score(dwell, intent.amount, &patterns);
                (
                    score.confidence,
                    score.suggested_action,
                    score.message,
                    Some(scorer::quick_return(dwell)),
                )
            }
            None => {
                let (message, action) = scorer::select_message(scorer::BASE_CONFIDENCE);
                (scorer::BASE_CONFIDENCE, action, message.to_string(), None)
            }
        };

        let prompt = ConfirmationPrompt {
            intent_id: intent.id.clone(),
            payee_display_name: intent.payee.display_name.clone(),
            amount: intent.amount,
            dwell_secs,
            quick_return: quick,
            confidence,
            suggested_action,
            message,
            raised_at: self.session.ctx.time.now(),
        };

        metrics::inc_prompt_shown();
        info!(
            intent_id = %intent.id,
            confidence,
            amount = intent.amount.to_f64().unwrap_or(0.0),
            "Confirmation prompt raised"
        );
        self.prompts
            .lock()
            .insert(intent.id.clone(), prompt.clone());
        self.session.emit(ReconcileEvent::PromptRequested {
            prompt: prompt.clone(),
        });
        prompt
    }

    pub fn open_prompts(&self) -> Vec<ConfirmationPrompt> {
        let mut prompts: Vec<_> = self.prompts.lock().values().cloned().collect();
        prompts.sort_by(|a, b| b.raised_at.cmp(&a.raised_at));
        prompts
    }

    // --- Resolution ---

    /// Apply the user's answer to a prompt or a recovery listing entry.
    pub fn respond(
        &self,
        intent_id: &str,
        response: PromptResponse,
    ) -> Result<Resolution, ReconcileError> {
        let prompt = self.prompts.lock().remove(intent_id);
        let dwell_secs = prompt.as_ref().and_then(|p| p.dwell_secs);

        // Re-validate: a callback or another answer may have landed first
        let Some(intent) = self.session.pending.get_pending(intent_id) else {
            info!(intent_id = %intent_id, response = ?response, "Intent no longer pending");
            return Ok(Resolution::AlreadyResolved {
                intent_id: intent_id.to_string(),
            });
        };

        match response {
            PromptResponse::Paid => {
                let confirmation = Confirmation {
                    verified_by: VerifiedBy::User,
                    confidence: 100,
                    dwell_secs,
                    returned_at: prompt.map(|p| p.raised_at),
                    external_txn_id: None,
                    notes: None,
                };
                let outcome = self.session.commit_confirmed(&intent, confirmation)?;
                Ok(Resolution::Committed {
                    duplicate: !outcome.is_created(),
                    entry: outcome.into_entry(),
                })
            }
            PromptResponse::Failed | PromptResponse::Cancelled => {
                let reason = if response == PromptResponse::Failed {
                    "user reported failure"
                } else {
                    "user cancelled"
                };
                if self.session.discard(intent_id, dwell_secs, reason) {
                    self.session.untrack(intent_id);
                    Ok(Resolution::Discarded {
                        intent_id: intent_id.to_string(),
                    })
                } else {
                    Ok(Resolution::AlreadyResolved {
                        intent_id: intent_id.to_string(),
                    })
                }
            }
            PromptResponse::NotSure => {
                info!(intent_id = %intent_id, "Resolution deferred by user");
                self.session.transition(
                    intent_id,
                    ReconcileState::AwaitingReturn,
                    Some("not sure".into()),
                );
                // Ask again on the next return from the payment app
                *self.awaiting.lock() = Some(intent_id.to_string());
                if self.focus.available() {
                    self.dwell.arm();
                }
                Ok(Resolution::Deferred {
                    intent_id: intent_id.to_string(),
                })
            }
        }
    }

    /// Route a URI delivered to the app from outside.
    pub fn handle_deep_link(&self, uri: &str) -> DeepLinkOutcome {
        let outcome = self.deep_links.handle(uri);
        if let DeepLinkOutcome::Confirmed { intent_id, .. } | DeepLinkOutcome::Failed { intent_id } =
            &outcome
        {
            // The pending answer is moot now
            let was_awaiting = self.awaiting.lock().as_deref() == Some(intent_id.as_str());
            if was_awaiting {
                self.clear_awaiting(intent_id);
                self.dwell.disarm();
            }
            self.prompts.lock().remove(intent_id);
        }
        outcome
    }

    // --- Recovery ---

    /// Decide the launch route. Unresolved intents from a previous run send
    /// the user to the recovery listing.
    pub fn check_recovery_on_startup(&self) -> RecoveryRoute {
        let intents = self.session.pending.get_pendings();
        if intents.is_empty() {
            return RecoveryRoute::Normal;
        }
        info!(count = intents.len(), "Unresolved payments found on startup");
        self.session.emit(ReconcileEvent::RecoveryRequired {
            intents: intents.clone(),
        });
        RecoveryRoute::Recovery { intents }
    }

    /// Pending intents, most recent first.
    pub fn recovery_listing(&self) -> Vec<PaymentIntent> {
        self.session.pending.get_pendings()
    }

    /// Mark every visible pending intent as paid, one at a time.
    pub fn confirm_all_pending(&self) -> BulkConfirmReport {
        let mut report = BulkConfirmReport::default();
        for intent in self.session.pending.get_pendings() {
            match self.respond(&intent.id, PromptResponse::Paid) {
                Ok(Resolution::Committed { entry, .. }) => report.committed.push(entry),
                Ok(_) => report.skipped.push(intent.id),
                Err(e) => {
                    error!(intent_id = %intent.id, "Bulk confirm failed: {}", e);
                    report.failed.push(intent.id);
                }
            }
        }
        info!(
            committed = report.committed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Bulk confirmation finished"
        );
        report
    }

    // --- App lock ---

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    pub fn unlock(&self) {
        self.lock.unlock();
    }

    pub fn set_app_lock_enabled(&self, enabled: bool) {
        self.lock.set_enabled(enabled);
    }

    // --- Data management ---

    pub fn export(&self) -> Result<serde_json::Map<String, serde_json::Value>, ReconcileError> {
        Ok(self.data.export()?)
    }

    /// Remove every key under this app's prefix.
    pub fn wipe(&self) -> Result<usize, ReconcileError> {
        let removed = self.data.wipe()?;
        self.prompts.lock().clear();
        *self.awaiting.lock() = None;
        self.dwell.disarm();
        warn!(removed, "All app data wiped");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{HostFocusSignal, NoFocusSignal, NoopLauncher};
    use crate::context::SimulatedTimeProvider;
    use crate::persistence::redb_store::MemoryStore;
    use crate::scorer::MSG_NEUTRAL;
    use rust_decimal_macros::dec;

    const T0: i64 = 1_700_000_000_000;

    fn reconciler_with(
        launcher: NoopLauncher,
        focus: Arc<dyn FocusSignal>,
    ) -> (Reconciler, Arc<SimulatedTimeProvider>) {
        let (ctx, clock) = ReconcileContext::new_simulated(T0);
        let data = AppDataStore::new(Arc::new(MemoryStore::new()), "@test");
        let r = Reconciler::new(
            ctx,
            data,
            ReconcileConfig::default(),
            Arc::new(launcher),
            focus,
        );
        (r, clock)
    }

    fn reconciler() -> (Reconciler, Arc<SimulatedTimeProvider>) {
        reconciler_with(NoopLauncher::default(), Arc::new(HostFocusSignal))
    }

    fn request(amount: Decimal) -> PaymentRequest {
        PaymentRequest {
            payee: Payee::new("shop@upi", "Shop"),
            amount,
            note: None,
            category: Some("Food".into()),
            app_id: Some("com.wallet".into()),
            supports_callback: false,
        }
    }

    #[tokio::test]
    async fn test_start_payment_persists_then_launches() {
        let (r, _) = reconciler();
        let started = r.start_payment(request(dec!(120))).await.unwrap();

        assert_eq!(r.recovery_listing().len(), 1);
        assert!(!started.uri.contains("tr="));
        assert!(started.prompt.is_none());
        assert!(r.dwell.is_armed());
        assert_eq!(
            r.session.patterns.preferred_app().as_deref(),
            Some("com.wallet")
        );
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let (r, _) = reconciler();
        let err = r.start_payment(request(Decimal::ZERO)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAmount(_)));
        assert!(r.recovery_listing().is_empty());
    }

    #[tokio::test]
    async fn test_sub_paisa_amount_rejected() {
        let (r, _) = reconciler();
        let err = r.start_payment(request(dec!(0.004))).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidAmount(_)));
        assert!(r.recovery_listing().is_empty());
        assert!(!r.dwell.is_armed());
    }

    #[tokio::test]
    async fn test_amount_rounded_to_two_places() {
        let (r, _) = reconciler();
        let started = r.start_payment(request(dec!(10.555))).await.unwrap();

        assert_eq!(started.intent.amount, dec!(10.555).round_dp(2));
        assert_eq!(started.intent.amount.scale(), 2);
        assert!(started
            .uri
            .contains(&format!("am={}", started.intent.amount)));
        assert_eq!(r.recovery_listing()[0].amount, started.intent.amount);
    }

    #[tokio::test]
    async fn test_refused_launch_leaves_nothing_pending() {
        let (r, _) = reconciler_with(NoopLauncher::refusing(), Arc::new(HostFocusSignal));
        let err = r.start_payment(request(dec!(50))).await.unwrap_err();
        assert!(matches!(err, ReconcileError::LaunchFailed { .. }));
        assert!(r.recovery_listing().is_empty());
        assert!(!r.dwell.is_armed());
    }

    #[tokio::test]
    async fn test_return_raises_scored_prompt() {
        let (r, clock) = reconciler();
        let started = r.start_payment(request(dec!(250))).await.unwrap();

        r.on_app_state_change(AppState::Background);
        clock.advance(20_000);
        let outcome = r.on_app_state_change(AppState::Active);

        let ReturnOutcome::Prompt { prompt } = outcome else {
            panic!("expected prompt, got {:?}", outcome);
        };
        assert_eq!(prompt.intent_id, started.intent.id);
        // 50 + 30 (typical dwell) + 5 (small amount)
        assert_eq!(prompt.confidence, 85.0);
        assert_eq!(prompt.quick_return, Some(QuickReturn::High));
        assert_eq!(r.open_prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_flicker_suppressed_and_observer_rearmed() {
        let (r, clock) = reconciler();
        r.start_payment(request(dec!(250))).await.unwrap();

        r.on_app_state_change(AppState::Inactive);
        clock.advance(1_500);
        let outcome = r.on_app_state_change(AppState::Active);
        assert_eq!(outcome, ReturnOutcome::Suppressed { dwell_secs: 1.5 });
        assert!(r.dwell.is_armed());

        r.on_app_state_change(AppState::Background);
        clock.advance(30_000);
        assert!(matches!(
            r.on_app_state_change(AppState::Active),
            ReturnOutcome::Prompt { .. }
        ));
    }

    #[tokio::test]
    async fn test_no_focus_signal_prompts_immediately() {
        let (r, _) = reconciler_with(NoopLauncher::default(), Arc::new(NoFocusSignal));
        let started = r.start_payment(request(dec!(75))).await.unwrap();

        let prompt = started.prompt.unwrap();
        assert_eq!(prompt.dwell_secs, None);
        assert_eq!(prompt.message, MSG_NEUTRAL);
        assert!(!r.dwell.is_armed());
    }

    #[tokio::test]
    async fn test_paid_commits_once() {
        let (r, clock) = reconciler();
        let started = r.start_payment(request(dec!(250))).await.unwrap();
        r.on_app_state_change(AppState::Background);
        clock.advance(20_000);
        r.on_app_state_change(AppState::Active);

        let resolution = r.respond(&started.intent.id, PromptResponse::Paid).unwrap();
        let Resolution::Committed { entry, duplicate } = resolution else {
            panic!("expected commit");
        };
        assert!(!duplicate);
        assert_eq!(entry.verified_by, VerifiedBy::User);
        assert_eq!(entry.idempotency_key.as_deref(), Some(started.intent.id.as_str()));

        // Second answer is moot
        let again = r.respond(&started.intent.id, PromptResponse::Paid).unwrap();
        assert!(matches!(again, Resolution::AlreadyResolved { .. }));
        assert_eq!(r.ledger().list().len(), 1);
        assert_eq!(r.patterns().total_confirmed, 1);
    }

    #[tokio::test]
    async fn test_not_sure_keeps_pending_and_patterns() {
        let (r, _) = reconciler_with(NoopLauncher::default(), Arc::new(NoFocusSignal));
        let started = r.start_payment(request(dec!(75))).await.unwrap();

        let resolution = r
            .respond(&started.intent.id, PromptResponse::NotSure)
            .unwrap();
        assert!(matches!(resolution, Resolution::Deferred { .. }));
        assert_eq!(r.recovery_listing().len(), 1);
        assert_eq!(r.patterns(), UserPatterns::default());
    }

    #[tokio::test]
    async fn test_not_sure_asks_again_on_next_return() {
        let (r, clock) = reconciler();
        let started = r.start_payment(request(dec!(75))).await.unwrap();
        let id = started.intent.id.clone();

        r.on_app_state_change(AppState::Background);
        clock.advance(20_000);
        let first = r.on_app_state_change(AppState::Active);
        assert!(matches!(first, ReturnOutcome::Prompt { .. }));
        assert!(!r.dwell.is_armed());

        let resolution = r.respond(&id, PromptResponse::NotSure).unwrap();
        assert!(matches!(resolution, Resolution::Deferred { .. }));
        assert!(r.dwell.is_armed());
        assert!(r.open_prompts().is_empty());

        // User goes back to the payment app to check
        r.on_app_state_change(AppState::Background);
        clock.advance(20_000);
        let ReturnOutcome::Prompt { prompt } = r.on_app_state_change(AppState::Active) else {
            panic!("expected a second prompt");
        };
        assert_eq!(prompt.intent_id, id);
        assert_eq!(prompt.dwell_secs, Some(20.0));
    }

    #[tokio::test]
    async fn test_not_sure_on_resolved_intent() {
        let (r, _) = reconciler_with(NoopLauncher::default(), Arc::new(NoFocusSignal));
        let started = r.start_payment(request(dec!(75))).await.unwrap();
        r.respond(&started.intent.id, PromptResponse::Paid).unwrap();

        let resolution = r
            .respond(&started.intent.id, PromptResponse::NotSure)
            .unwrap();
        assert!(matches!(resolution, Resolution::AlreadyResolved { .. }));
    }

    #[tokio::test]
    async fn test_cancel_discards_without_ledger_entry() {
        let (r, _) = reconciler_with(NoopLauncher::default(), Arc::new(NoFocusSignal));
        let started = r.start_payment(request(dec!(75))).await.unwrap();

        let resolution = r
            .respond(&started.intent.id, PromptResponse::Cancelled)
            .unwrap();
        assert!(matches!(resolution, Resolution::Discarded { .. }));
        assert!(r.ledger().list().is_empty());
        assert!(r.recovery_listing().is_empty());
        assert_eq!(r.patterns().total_failed, 1);
    }

    #[tokio::test]
    async fn test_lock_event_emitted_after_long_absence() {
        let (r, clock) = reconciler();
        let mut events = r.subscribe();

        r.on_app_state_change(AppState::Background);
        clock.advance(130_000);
        assert_eq!(r.on_app_state_change(AppState::Active), ReturnOutcome::Idle);
        assert!(r.is_locked());

        let event = events.try_recv().unwrap();
        assert!(matches!(event, ReconcileEvent::LockRequired { .. }));
    }
}
