/// Payment Reconciliation FSM
///
/// Every payment intent the app hands to an external wallet moves through a
/// guarded set of states. Illegal transitions are logged and rejected.
///
/// State Diagram:
/// ```text
///   Created → AwaitingReturn → Resolving → Committed
///      ↓            ↓             ↓   ↑
///   Discarded   Discarded    Discarded │
///                   ↑_________________ ┘  (deferred: back to AwaitingReturn)
///
///   Terminal states: Committed, Discarded
/// ```
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileState {
    /// Pending entry persisted, launch requested
    Created,
    /// Control has left the app; dwell observer armed
    AwaitingReturn,
    /// A return or callback is being turned into an outcome
    Resolving,
    /// Ledger entry written (terminal)
    Committed,
    /// Cancelled, failed or refused at launch (terminal)
    Discarded,
}

impl ReconcileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Discarded)
    }

    pub fn valid_transitions(&self) -> &'static [ReconcileState] {
        use ReconcileState::*;
        match self {
            Created => &[AwaitingReturn, Discarded],
            AwaitingReturn => &[Resolving, Discarded],
            Resolving => &[Committed, Discarded, AwaitingReturn],
            Committed => &[],
            Discarded => &[],
        }
    }

    pub fn can_transition_to(&self, next: &ReconcileState) -> bool {
        self.valid_transitions().contains(next)
    }
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("Illegal transition for {intent_id}: {from} → {to}")]
pub struct FsmError {
    pub intent_id: String,
    pub from: ReconcileState,
    pub to: ReconcileState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsmTransition {
    pub from: ReconcileState,
    pub to: ReconcileState,
    pub timestamp_ms: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentFsm {
    pub intent_id: String,
    pub state: ReconcileState,
    pub transitions: Vec<FsmTransition>,
}

impl IntentFsm {
    pub fn new(intent_id: String) -> Self {
        Self {
            intent_id,
            state: ReconcileState::Created,
            transitions: Vec::new(),
        }
    }

    pub fn transition(
        &mut self,
        next: ReconcileState,
        timestamp_ms: i64,
        reason: Option<String>,
    ) -> Result<(), FsmError> {
        if !self.state.can_transition_to(&next) {
            let err = FsmError {
                intent_id: self.intent_id.clone(),
                from: self.state,
                to: next,
            };
            error!(reason = ?reason, "{}", err);
            return Err(err);
        }

        info!(
            intent_id = %self.intent_id,
            from = %self.state,
            to = %next,
            "FSM transition"
        );

        self.transitions.push(FsmTransition {
            from: self.state,
            to: next,
            timestamp_ms,
            reason,
        });
        self.state = next;
        Ok(())
    }

    pub fn discard(&mut self, timestamp_ms: i64, reason: String) -> Result<(), FsmError> {
        self.transition(ReconcileState::Discarded, timestamp_ms, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
