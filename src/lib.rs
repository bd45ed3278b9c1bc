// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod audio;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod filter;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::classify::{Classifier, RiskLevel, ThreatType, Verdict};
pub use crate::filter::ThreatFilter;
pub use crate::notify::{should_notify, Notifier, NotifyWindow};
pub use crate::store::{ContextRecord, ContextStore};
