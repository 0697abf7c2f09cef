//! Inbound deep links.
//!
//! Two kinds of URI reach the app from outside: callbacks from a payment app
//! reporting the outcome of a launch we made (`...?tr=<intent id>&status=...`),
//! and `upi://pay` request links shared by someone asking to be paid. Anything
//! else is ignored without side effects.

use crate::config::ReconcileConfig;
use crate::metrics;
use crate::model::VerifiedBy;
use crate::session::{Confirmation, ReconcileSession};
use crate::upi_uri::{PaymentLink, parse_payment_uri};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;
use url::form_urlencoded;

/// Query keys whose presence marks a URI as a payment-app callback.
const CALLBACK_KEYS: &[&str] = &["tr", "txnRef", "response", "Status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Failure,
    Unrecognized,
}

impl CallbackStatus {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "submitted" => Self::Success,
            "failure" | "failed" => Self::Failure,
            _ => Self::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackParams {
    pub transaction_ref: Option<String>,
    pub status: CallbackStatus,
    pub raw_status: Option<String>,
    pub txn_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeepLinkKind {
    Callback(CallbackParams),
    PaymentRequest(PaymentLink),
    Foreign,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeepLinkOutcome {
    /// Not ours, or carried nothing actionable.
    Ignored,
    /// A callback whose reference matches no outstanding trackable intent.
    Unmatched { transaction_ref: String },
    Confirmed {
        intent_id: String,
        entry: crate::model::LedgerEntry,
        duplicate: bool,
    },
    Failed { intent_id: String },
    /// The callback matched but the ledger write failed; the intent stays
    /// pending for recovery.
    Deferred { intent_id: String },
    /// Someone shared a payment request; the UI decides whether to pay it.
    PaymentRequest { link: PaymentLink },
}

impl DeepLinkOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Unmatched { .. } => "unmatched",
            Self::Confirmed { .. } => "confirmed",
            Self::Failed { .. } => "failed",
            Self::Deferred { .. } => "deferred",
            Self::PaymentRequest { .. } => "payment_request",
        }
    }
}

fn query_pairs(uri: &str) -> Option<Vec<(String, String)>> {
    let trimmed = uri.trim();
    if let Ok(url) = Url::parse(trimmed) {
        return Some(url.query_pairs().into_owned().collect());
    }
    // Some wallets hand back a bare `key=value&...` response string
    if trimmed.contains('=') && !trimmed.contains("://") {
        return Some(
            form_urlencoded::parse(trimmed.trim_start_matches('?').as_bytes())
                .into_owned()
                .collect(),
        );
    }
    None
}

/// Extract callback parameters. Returns None unless at least one callback key
/// is present. A `response` value that is itself a query string is unpacked.
pub fn parse_callback(uri: &str) -> Option<CallbackParams> {
    let pairs = query_pairs(uri)?;
    if !pairs
        .iter()
        .any(|(k, _)| CALLBACK_KEYS.contains(&k.as_str()))
    {
        return None;
    }

    let mut transaction_ref = None;
    let mut status = None;
    let mut status_upper = None;
    let mut response = None;
    let mut txn_id = None;

    for (key, value) in pairs {
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "tr" => transaction_ref = Some(value),
            "txnRef" => {
                transaction_ref.get_or_insert(value);
            }
            "status" => status = Some(value),
            "Status" => status_upper = Some(value),
            "response" => response = Some(value),
            "txnId" => txn_id = Some(value),
            _ => {}
        }
    }

    // `response=txnId=..&Status=SUCCESS&txnRef=..`
    if let Some(inner) = response.as_deref().filter(|r| r.contains('=')) {
        for (key, value) in form_urlencoded::parse(inner.as_bytes()).into_owned() {
            match key.as_str() {
                "Status" | "status" => {
                    status_upper.get_or_insert(value);
                }
                "txnRef" | "tr" => {
                    transaction_ref.get_or_insert(value);
                }
                "txnId" => {
                    txn_id.get_or_insert(value);
                }
                _ => {}
            }
        }
        response = None;
    }

    let raw_status = status.or(status_upper).or(response);
    let status = raw_status
        .as_deref()
        .map(CallbackStatus::parse)
        .unwrap_or(CallbackStatus::Unrecognized);

    Some(CallbackParams {
        transaction_ref,
        status,
        raw_status,
        txn_id,
    })
}

fn has_prefix(uri: &str, prefixes: &[String]) -> bool {
    let lower = uri.trim().to_ascii_lowercase();
    prefixes
        .iter()
        .any(|p| lower.starts_with(&p.to_ascii_lowercase()))
}

/// Decide what an inbound URI is without touching any state.
///
/// Callbacks must arrive under a configured callback prefix (or as a bare
/// response string); payment requests must match a payment-link prefix. A
/// `upi://pay` link carrying `tr` is a payment request, not a callback.
pub fn classify(uri: &str, cfg: &ReconcileConfig) -> DeepLinkKind {
    let is_bare = !uri.contains("://");
    let owns_callback =
        is_bare || cfg.callback_prefixes.is_empty() || has_prefix(uri, &cfg.callback_prefixes);

    if owns_callback {
        if let Some(params) = parse_callback(uri) {
            return DeepLinkKind::Callback(params);
        }
    }

    if has_prefix(uri, &cfg.payment_link_prefixes) {
        if let Some(link) = parse_payment_uri(uri) {
            return DeepLinkKind::PaymentRequest(link);
        }
    }

    DeepLinkKind::Foreign
}

/// Resolves tracked intents from payment-app callbacks.
pub struct DeepLinkHandler {
    session: Arc<ReconcileSession>,
    cfg: ReconcileConfig,
}

impl DeepLinkHandler {
    pub fn new(session: Arc<ReconcileSession>, cfg: ReconcileConfig) -> Self {
        Self { session, cfg }
    }

    /// Never fails: malformed or foreign input yields `Ignored`.
    pub fn handle(&self, uri: &str) -> DeepLinkOutcome {
        let outcome = match classify(uri, &self.cfg) {
            DeepLinkKind::Foreign => {
                debug!("Ignoring foreign deep link");
                DeepLinkOutcome::Ignored
            }
            DeepLinkKind::PaymentRequest(link) => {
                info!(payee = %link.payee.external_id, "Inbound payment request link");
                DeepLinkOutcome::PaymentRequest { link }
            }
            DeepLinkKind::Callback(params) => self.resolve_callback(params),
        };
        metrics::inc_deep_link(outcome.label());
        outcome
    }

    fn resolve_callback(&self, params: CallbackParams) -> DeepLinkOutcome {
        let Some(tr) = params.transaction_ref.clone() else {
            debug!(status = ?params.raw_status, "Callback without transaction reference");
            return DeepLinkOutcome::Ignored;
        };

        let tracked = match self.session.tracked(&tr) {
            Some(t) if t.trackable && !t.failed && !t.fsm.is_terminal() => t,
            _ => {
                info!(transaction_ref = %tr, "Callback matches no outstanding intent");
                return DeepLinkOutcome::Unmatched {
                    transaction_ref: tr,
                };
            }
        };

        let now = self.session.ctx.time.now();
        let dwell_secs = (now - tracked.launched_at).num_milliseconds().max(0) as f64 / 1000.0;

        match params.status {
            CallbackStatus::Success => {
                let confirmation = Confirmation {
                    verified_by: VerifiedBy::Intent,
                    confidence: 100,
                    dwell_secs: Some(dwell_secs),
                    returned_at: Some(now),
                    external_txn_id: params.txn_id,
                    notes: params.raw_status.map(|s| format!("callback status: {}", s)),
                };
                match self.session.commit_confirmed(&tracked.intent, confirmation) {
                    Ok(outcome) => DeepLinkOutcome::Confirmed {
                        intent_id: tracked.intent.id.clone(),
                        duplicate: !outcome.is_created(),
                        entry: outcome.into_entry(),
                    },
                    Err(e) => {
                        error!(intent_id = %tracked.intent.id, "Callback commit failed: {}", e);
                        DeepLinkOutcome::Deferred {
                            intent_id: tracked.intent.id,
                        }
                    }
                }
            }
            CallbackStatus::Failure => {
                self.session.mark_failed(&tracked.intent.id);
                self.session
                    .discard(&tracked.intent.id, Some(dwell_secs), "callback reported failure");
                DeepLinkOutcome::Failed {
                    intent_id: tracked.intent.id,
                }
            }
            // Neither success nor failure: leave the intent for the user to resolve
            CallbackStatus::Unrecognized => {
                warn!(
                    intent_id = %tracked.intent.id,
                    status = ?params.raw_status,
                    "Unrecognized callback status"
                );
                DeepLinkOutcome::Ignored
            }
        }
    }
}
