pub mod api;
pub mod capability;
pub mod config;
pub mod context;
pub mod deep_link;
pub mod intent_fsm;
pub mod ledger_store;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod pending_store;
pub mod persistence;
pub mod reconciler;
pub mod scorer;
pub mod session;
pub mod storage_keys;
pub mod upi_uri;
pub mod user_patterns;
