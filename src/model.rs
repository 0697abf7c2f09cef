use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Receiving side of a payment: the UPI address plus the name shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Payee {
    pub external_id: String,
    pub display_name: String,
}

impl Payee {
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntentStatus::Pending)
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Confirmed => "confirmed",
            IntentStatus::Cancelled => "cancelled",
            IntentStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A payment handed off to an external app and not yet resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    pub payee: Payee,
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
    pub category: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub launched_app: Option<String>,
    pub status: IntentStatus,
}

impl PaymentIntent {
    pub fn is_pending(&self) -> bool {
        self.status == IntentStatus::Pending
    }

    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Income,
    #[default]
    Expense,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    #[default]
    Upi,
    Cash,
    Bank,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
    Unknown,
}

/// Which signal settled the ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifiedBy {
    #[default]
    User,
    Intent,
    Auto,
    Manual,
}

/// A finalized ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub amount: Decimal,
    pub payee_external_id: String,
    pub payee_display_name: String,
    pub category: String,
    pub direction: Direction,
    pub method: PaymentMethod,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `YYYY-MM` bucket derived from `created_at`.
    pub month: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,

    // Verification metadata
    pub status: VerificationStatus,
    pub confidence: u8,
    pub verified_by: VerifiedBy,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_txn_id: Option<String>,
    #[serde(default)]
    pub verification_notes: Option<String>,
}

pub fn month_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Privacy-safe aggregate of how this user's payments tend to go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserPatterns {
    pub total_payments: u64,
    pub total_confirmed: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    /// Exponential moving average of dwell time in the external app, seconds.
    pub avg_time_in_external_app: f64,
}

pub const NEUTRAL_SUCCESS_RATE: f64 = 0.85;
pub const NEUTRAL_AVG_DWELL_SECS: f64 = 15.0;
pub const DWELL_EMA_ALPHA: f64 = 0.2;

impl Default for UserPatterns {
    fn default() -> Self {
        Self {
            total_payments: 0,
            total_confirmed: 0,
            total_failed: 0,
            success_rate: NEUTRAL_SUCCESS_RATE,
            avg_time_in_external_app: NEUTRAL_AVG_DWELL_SECS,
        }
    }
}

impl UserPatterns {
    /// Fold one resolved payment into the aggregate.
    pub fn record(&mut self, confirmed: bool, dwell_secs: Option<f64>) {
        self.total_payments += 1;
        if confirmed {
            self.total_confirmed += 1;
        } else {
            self.total_failed += 1;
        }
        self.success_rate = self.total_confirmed as f64 / self.total_payments as f64;

        if let Some(dwell) = dwell_secs {
            self.avg_time_in_external_app =
                self.avg_time_in_external_app * (1.0 - DWELL_EMA_ALPHA) + dwell * DWELL_EMA_ALPHA;
        }
    }
}

/// An installed app able to handle `upi://pay` links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_id: String,
    pub name: String,
    #[serde(default)]
    pub supports_callback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_patterns_default_is_neutral() {
        let p = UserPatterns::default();
        assert_eq!(p.total_payments, 0);
        assert_eq!(p.success_rate, 0.85);
        assert_eq!(p.avg_time_in_external_app, 15.0);
    }

    #[test]
    fn test_patterns_record_recomputes_rate_and_ema() {
        let mut p = UserPatterns::default();
        p.record(true, Some(20.0));
        assert_eq!(p.total_payments, 1);
        assert_eq!(p.success_rate, 1.0);
        assert!((p.avg_time_in_external_app - 16.0).abs() < 1e-9);

        p.record(false, None);
        assert_eq!(p.total_failed, 1);
        assert_eq!(p.success_rate, 0.5);
        assert!((p.avg_time_in_external_app - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&IntentStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert!(IntentStatus::Expired.is_terminal());
        assert!(!IntentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_month_bucket() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(month_bucket(at), "2025-03");
    }
}
