//! store.rs — in-memory log of relevant classified posts, used to give the
//! classifier a sliding window of recent situational context.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::classify::Verdict;

/// One relevant classification outcome. Only verdicts with
/// `relevant == true` and a non-"none" risk level ever become records.
#[derive(Debug, Clone, Serialize)]
pub struct ContextRecord {
    pub input: String,
    pub response: Verdict,
    pub created_at: DateTime<Utc>,
}

/// Append-only store with time-based purge. Single writer (the
/// classification worker), read by the worker itself and the HTTP listing
/// endpoints.
#[derive(Debug, Default)]
pub struct ContextStore {
    inner: Mutex<Vec<ContextRecord>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, input: String, response: Verdict, created_at: DateTime<Utc>) {
        let mut v = self.inner.lock().expect("context store mutex poisoned");
        v.push(ContextRecord {
            input,
            response,
            created_at,
        });
    }

    /// Records newer than `now - lookback`, chronologically ascending,
    /// keeping at most the first `cap` of them (the oldest inside the
    /// window). This is the classifier's context query.
    pub fn recent_window(&self, now: DateTime<Utc>, lookback: Duration, cap: usize) -> Vec<ContextRecord> {
        let cutoff = now - lookback;
        let v = self.inner.lock().expect("context store mutex poisoned");
        let mut recent: Vec<ContextRecord> =
            v.iter().filter(|r| r.created_at >= cutoff).cloned().collect();
        recent.sort_by_key(|r| r.created_at);
        recent.truncate(cap);
        recent
    }

    /// Most-recent-first window keeping at most the `cap` newest records.
    /// Used by the listing endpoint.
    pub fn recent_window_desc(&self, now: DateTime<Utc>, lookback: Duration, cap: usize) -> Vec<ContextRecord> {
        let cutoff = now - lookback;
        let v = self.inner.lock().expect("context store mutex poisoned");
        let mut recent: Vec<ContextRecord> =
            v.iter().filter(|r| r.created_at >= cutoff).cloned().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(cap);
        recent
    }

    /// Full contents, chronologically ascending.
    pub fn snapshot_all(&self) -> Vec<ContextRecord> {
        let v = self.inner.lock().expect("context store mutex poisoned");
        let mut all = v.clone();
        all.sort_by_key(|r| r.created_at);
        all
    }

    /// Drop records older than the retention window. Returns how many were
    /// removed.
    pub fn purge_older_than(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        let mut v = self.inner.lock().expect("context store mutex poisoned");
        let before = v.len();
        v.retain(|r| r.created_at >= cutoff);
        before - v.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("context store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Purge once at startup and then on a fixed interval (the store is small,
/// a full scan is fine).
pub fn spawn_purge_task(
    store: Arc<ContextStore>,
    retention: Duration,
    every: StdDuration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let removed = store.purge_older_than(Utc::now(), retention);
        tracing::info!(removed, "context store purged at startup");

        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // first tick completes immediately
        loop {
            ticker.tick().await;
            let removed = store.purge_older_than(Utc::now(), retention);
            tracing::info!(removed, "context store purged");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{RiskLevel, ThreatType, Verdict};
    use chrono::TimeZone;

    fn verdict(summary: &str) -> Verdict {
        Verdict {
            relevant: true,
            risk_level: RiskLevel::Medium,
            threat_type: ThreatType::CruiseMissile,
            location_match: vec!["Смела".into()],
            trajectory_threat: true,
            reason: "тест".into(),
            summary: summary.into(),
            language: "ru".into(),
        }
    }

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, min, 0).unwrap()
    }

    #[test]
    fn window_is_ascending_and_caps_oldest_in_window() {
        let store = ContextStore::new();
        for m in 0..10u32 {
            store.append(format!("msg-{m}"), verdict("s"), at(m));
        }
        let now = at(10);
        let win = store.recent_window(now, Duration::hours(1), 7);
        assert_eq!(win.len(), 7);
        // ascending sort, then the cap: the oldest seven inside the window
        assert_eq!(win.first().unwrap().input, "msg-0");
        assert_eq!(win.last().unwrap().input, "msg-6");
    }

    #[test]
    fn window_excludes_records_past_lookback() {
        let store = ContextStore::new();
        store.append("old".into(), verdict("s"), at(0) - Duration::hours(2));
        store.append("new".into(), verdict("s"), at(5));
        let win = store.recent_window(at(10), Duration::hours(1), 7);
        assert_eq!(win.len(), 1);
        assert_eq!(win[0].input, "new");
    }

    #[test]
    fn desc_window_is_most_recent_first() {
        let store = ContextStore::new();
        store.append("a".into(), verdict("s"), at(1));
        store.append("b".into(), verdict("s"), at(2));
        let win = store.recent_window_desc(at(3), Duration::hours(1), 7);
        assert_eq!(win[0].input, "b");
        assert_eq!(win[1].input, "a");
    }

    #[test]
    fn desc_window_caps_newest_in_window() {
        let store = ContextStore::new();
        for m in 0..10u32 {
            store.append(format!("msg-{m}"), verdict("s"), at(m));
        }
        let win = store.recent_window_desc(at(10), Duration::hours(1), 7);
        assert_eq!(win.len(), 7);
        assert_eq!(win.first().unwrap().input, "msg-9");
        assert_eq!(win.last().unwrap().input, "msg-3");
    }

    #[test]
    fn purge_removes_only_expired_records() {
        let store = ContextStore::new();
        let now = at(0);
        store.append("stale".into(), verdict("s"), now - Duration::days(3));
        store.append("fresh".into(), verdict("s"), now - Duration::hours(3));
        let removed = store.purge_older_than(now, Duration::days(2));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot_all()[0].input, "fresh");
    }
}
