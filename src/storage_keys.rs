// Canonical storage key catalog.
// Every durable record lives under `<prefix>:<name>` so export and wipe can
// enumerate by prefix match.

// -----------------------------------------------------------------------------
// PREFIX
// -----------------------------------------------------------------------------

pub const DEFAULT_PREFIX: &str = "@paytrack";
pub const SEPARATOR: char = ':';

// -----------------------------------------------------------------------------
// COLLECTIONS
// -----------------------------------------------------------------------------

/// Bounded list of in-flight payment intents.
pub const PENDING_TRANSACTIONS: &str = "pending_transactions";
/// Unbounded list of ledger entries.
pub const TRANSACTIONS: &str = "transactions";

// -----------------------------------------------------------------------------
// SINGLETONS
// -----------------------------------------------------------------------------

pub const USER_PATTERNS: &str = "user_patterns";
pub const PREFERRED_EXTERNAL_APP: &str = "preferred_external_app";

pub fn namespaced(prefix: &str, name: &str) -> String {
    format!("{}{}{}", prefix, SEPARATOR, name)
}

pub fn prefix_pattern(prefix: &str) -> String {
    format!("{}{}", prefix, SEPARATOR)
}
