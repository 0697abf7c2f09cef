//! Confidence scoring for payments completed outside the app.
//!
//! Two heuristics are kept side by side:
//! - the quick-return gate decides whether to interrupt the user at all;
//! - the fine scorer decides what to recommend once a prompt is shown.
//!
//! The fine scorer is an ordered rule table evaluated top to bottom on a base
//! of 50, then clamped to [0, 100].

use crate::model::UserPatterns;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

pub const BASE_CONFIDENCE: f64 = 50.0;
pub const HIGH_CONFIDENCE: f64 = 70.0;
pub const LOW_CONFIDENCE: f64 = 30.0;
/// History only counts once the user has more payments than this.
pub const MIN_HISTORY_PAYMENTS: u64 = 5;

pub const MSG_COMPLETED: &str = "Payment completed successfully?";
pub const MSG_FAILED: &str = "Payment was cancelled or failed?";
pub const MSG_NEUTRAL: &str = "Did the payment complete?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub dwell_secs: f64,
    pub amount: Decimal,
    pub patterns: &'a UserPatterns,
}

/// One scoring rule: when `applies`, add `delta` to the running score.
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&ScoreInput) -> bool,
    pub delta: fn(&ScoreInput) -> f64,
}

fn amount_f64(input: &ScoreInput) -> f64 {
    input.amount.to_f64().unwrap_or(0.0)
}

pub static RULES: &[Rule] = &[
    Rule {
        name: "dwell_typical",
        applies: |i| (10.0..=60.0).contains(&i.dwell_secs),
        delta: |_| 30.0,
    },
    Rule {
        name: "dwell_too_short",
        applies: |i| i.dwell_secs < 5.0,
        delta: |_| -30.0,
    },
    Rule {
        name: "dwell_too_long",
        applies: |i| i.dwell_secs > 120.0,
        delta: |_| -10.0,
    },
    Rule {
        name: "history",
        applies: |i| i.patterns.total_payments > MIN_HISTORY_PAYMENTS,
        delta: |i| i.patterns.success_rate * 20.0,
    },
    Rule {
        name: "small_amount",
        applies: |i| {
            let a = amount_f64(i);
            a > 0.0 && a < 1000.0
        },
        delta: |_| 5.0,
    },
    Rule {
        name: "large_amount",
        applies: |i| amount_f64(i) > 10000.0,
        delta: |_| -5.0,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub confidence: f64,
    pub suggested_action: SuggestedAction,
    pub message: String,
    /// Names of the rules that fired, in evaluation order.
    pub applied_rules: Vec<String>,
}

impl Score {
    /// Confidence rounded for storage on a ledger entry.
    pub fn confidence_pct(&self) -> u8 {
        self.confidence.round().clamp(0.0, 100.0) as u8
    }
}

pub fn score(dwell_secs: f64, amount: Decimal, patterns: &UserPatterns) -> Score {
    let input = ScoreInput {
        dwell_secs,
        amount,
        patterns,
    };

    let mut confidence = BASE_CONFIDENCE;
    let mut applied_rules = Vec::new();
    for rule in RULES {
        if (rule.applies)(&input) {
            confidence += (rule.delta)(&input);
            applied_rules.push(rule.name.to_string());
        }
    }
    let confidence = confidence.clamp(0.0, 100.0);
    let (message, suggested_action) = select_message(confidence);

    Score {
        confidence,
        suggested_action,
        message: message.to_string(),
        applied_rules,
    }
}

pub fn select_message(confidence: f64) -> (&'static str, SuggestedAction) {
    if confidence >= HIGH_CONFIDENCE {
        (MSG_COMPLETED, SuggestedAction::Confirmed)
    } else if confidence <= LOW_CONFIDENCE {
        (MSG_FAILED, SuggestedAction::Failed)
    } else {
        (MSG_NEUTRAL, SuggestedAction::Confirmed)
    }
}

/// Coarse bucket of how long the user was away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuickReturn {
    High,
    Medium,
    Low,
    /// Accidental focus change; never prompt.
    Flicker,
}

pub fn quick_return(dwell_secs: f64) -> QuickReturn {
    if dwell_secs >= 12.0 {
        QuickReturn::High
    } else if dwell_secs >= 5.0 {
        QuickReturn::Medium
    } else if dwell_secs >= 2.0 {
        QuickReturn::Low
    } else {
        QuickReturn::Flicker
    }
}

pub fn should_prompt(dwell_secs: f64) -> bool {
    quick_return(dwell_secs) != QuickReturn::Flicker
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn history(total: u64, rate: f64) -> UserPatterns {
        UserPatterns {
            total_payments: total,
            total_confirmed: (total as f64 * rate) as u64,
            total_failed: total - (total as f64 * rate) as u64,
            success_rate: rate,
            avg_time_in_external_app: 15.0,
        }
    }

    #[test]
    fn test_gate_thresholds() {
        assert!(!should_prompt(1.5));
        assert!(should_prompt(2.0));
        assert!(should_prompt(12.0));
        assert_eq!(quick_return(3.0), QuickReturn::Low);
        assert_eq!(quick_return(5.0), QuickReturn::Medium);
        assert_eq!(quick_return(11.9), QuickReturn::Medium);
        assert_eq!(quick_return(12.0), QuickReturn::High);
    }

    #[test]
    fn test_three_second_return_suggests_failure() {
        // Large amount keeps the amount rules neutral: 50 - 30 = 20
        let s = score(3.0, dec!(5000), &UserPatterns::default());
        assert_eq!(s.confidence, 20.0);
        assert_eq!(s.suggested_action, SuggestedAction::Failed);
        assert_eq!(s.message, MSG_FAILED);
    }

    #[test]
    fn test_typical_dwell_small_amount() {
        let s = score(15.0, dec!(500), &UserPatterns::default());
        assert_eq!(s.confidence, 85.0);
        assert_eq!(s.suggested_action, SuggestedAction::Confirmed);
        assert_eq!(s.message, MSG_COMPLETED);
        assert_eq!(s.applied_rules, vec!["dwell_typical", "small_amount"]);
    }

    #[test]
    fn test_longer_dwell_beats_flicker() {
        let p = UserPatterns::default();
        assert!(score(15.0, dec!(500), &p).confidence > score(2.0, dec!(500), &p).confidence);
    }

    #[test]
    fn test_gray_zone_is_neutral() {
        // 5–10s: no dwell adjustment
        let s = score(7.0, dec!(5000), &UserPatterns::default());
        assert_eq!(s.confidence, 50.0);
        assert_eq!(s.suggested_action, SuggestedAction::Confirmed);
        assert_eq!(s.message, MSG_NEUTRAL);
    }

    #[test]
    fn test_history_only_after_five_payments() {
        let few = score(7.0, dec!(5000), &history(5, 1.0));
        assert_eq!(few.confidence, 50.0);

        let many = score(7.0, dec!(5000), &history(6, 1.0));
        assert_eq!(many.confidence, 70.0);
        assert_eq!(many.message, MSG_COMPLETED);
    }

    #[test]
    fn test_long_dwell_and_large_amount_penalties() {
        let s = score(200.0, dec!(20000), &UserPatterns::default());
        assert_eq!(s.confidence, 35.0);
        assert_eq!(s.message, MSG_NEUTRAL);
    }

    #[test]
    fn test_clamped_to_range() {
        let s = score(30.0, dec!(10), &history(100, 1.0));
        assert_eq!(s.confidence, 100.0);
        assert_eq!(s.confidence_pct(), 100);

        let s = score(0.5, dec!(50000), &UserPatterns::default());
        assert_eq!(s.confidence, 15.0);
    }
}
