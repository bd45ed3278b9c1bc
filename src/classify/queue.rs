// src/classify/queue.rs
//! Single-flight classification queue: one worker task consumes submissions
//! in order, so the external classifier never sees concurrent calls and each
//! call observes the context persisted by every earlier call.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::classify::{Classifier, Verdict};
use crate::store::ContextStore;

/// Context-window parameters for each classifier call.
#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    pub lookback: Duration,
    pub cap: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(1),
            cap: 7,
        }
    }
}

struct Job {
    text: String,
    reply: oneshot::Sender<Option<Verdict>>,
}

/// Cheap-to-clone submission handle.
#[derive(Clone)]
pub struct ClassifyHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl ClassifyHandle {
    /// Submit a post and wait for its verdict. `None` means the classifier
    /// call or response parsing failed; the caller treats that as
    /// non-notifiable.
    pub async fn classify(&self, text: String) -> Option<Verdict> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Job { text, reply }).is_err() {
            warn!("classification worker is gone, dropping submission");
            return None;
        }
        rx.await.unwrap_or(None)
    }
}

/// Spawn the worker; the handle is the only way in.
pub fn spawn(
    classifier: Arc<dyn Classifier>,
    store: Arc<ContextStore>,
    window: ContextWindow,
) -> (ClassifyHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let handle = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let verdict = run_one(&*classifier, &store, window, &job.text, Utc::now()).await;
            // Receiver may have gone away (e.g. HTTP client disconnected).
            let _ = job.reply.send(verdict);
        }
    });
    (ClassifyHandle { tx }, handle)
}

fn timestamped(ts: DateTime<Utc>, text: &str) -> String {
    format!("{}: {}", ts.to_rfc3339_opts(SecondsFormat::Millis, true), text)
}

/// One classification cycle: assemble context, call out, persist if relevant.
/// Failures are logged and collapse to `None`.
pub async fn run_one(
    classifier: &dyn Classifier,
    store: &ContextStore,
    window: ContextWindow,
    text: &str,
    now: DateTime<Utc>,
) -> Option<Verdict> {
    let context: Vec<String> = store
        .recent_window(now, window.lookback, window.cap)
        .iter()
        .map(|r| timestamped(r.created_at, &r.input))
        .collect();
    let current = timestamped(now, text);

    counter!("classify_calls_total").increment(1);
    match classifier.analyze(&context, &current).await {
        Ok(verdict) => {
            if verdict.is_storable() {
                store.append(text.to_string(), verdict.clone(), now);
            }
            info!(
                relevant = verdict.relevant,
                risk = ?verdict.risk_level,
                "classification finished"
            );
            Some(verdict)
        }
        Err(e) => {
            counter!("classify_failures_total").increment(1);
            warn!(error = ?e, "classification failed, treating as no verdict");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{RiskLevel, ThreatType};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedClassifier {
        // verdicts handed out in order; Err entries simulate call failures
        script: Mutex<Vec<anyhow::Result<Verdict>>>,
        seen_context: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn analyze(&self, context: &[String], _current: &str) -> anyhow::Result<Verdict> {
            self.seen_context
                .lock()
                .unwrap()
                .push(context.to_vec());
            self.script.lock().unwrap().remove(0)
        }
    }

    fn verdict(relevant: bool, risk: RiskLevel) -> Verdict {
        Verdict {
            relevant,
            risk_level: risk,
            threat_type: ThreatType::Drone,
            location_match: vec![],
            trajectory_threat: false,
            reason: "тест".into(),
            summary: "тест".into(),
            language: "ru".into(),
        }
    }

    #[tokio::test]
    async fn relevant_verdict_is_stored_and_fed_to_next_call() {
        let clf = Arc::new(ScriptedClassifier {
            script: Mutex::new(vec![
                Ok(verdict(true, RiskLevel::High)),
                Ok(verdict(true, RiskLevel::Medium)),
            ]),
            seen_context: Mutex::new(vec![]),
        });
        let store = Arc::new(ContextStore::new());
        let (handle, _worker) = spawn(clf.clone(), store.clone(), ContextWindow::default());

        let v1 = handle.classify("перший пуск".into()).await;
        assert!(v1.is_some());
        let v2 = handle.classify("другий пуск".into()).await;
        assert!(v2.is_some());

        let ctxs = clf.seen_context.lock().unwrap();
        assert!(ctxs[0].is_empty(), "first call must see empty context");
        assert_eq!(ctxs[1].len(), 1, "second call must see the first record");
        assert!(ctxs[1][0].ends_with("перший пуск"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn failure_yields_none_and_stores_nothing() {
        let clf = Arc::new(ScriptedClassifier {
            script: Mutex::new(vec![Err(anyhow!("schema mismatch"))]),
            seen_context: Mutex::new(vec![]),
        });
        let store = Arc::new(ContextStore::new());
        let out = run_one(
            &*clf,
            &store,
            ContextWindow::default(),
            "щось",
            Utc::now(),
        )
        .await;
        assert!(out.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_verdict_is_returned_but_not_stored() {
        // classifier flags a repeat: relevant=false, risk=none
        let clf = Arc::new(ScriptedClassifier {
            script: Mutex::new(vec![Ok(verdict(false, RiskLevel::None))]),
            seen_context: Mutex::new(vec![]),
        });
        let store = Arc::new(ContextStore::new());
        let out = run_one(
            &*clf,
            &store,
            ContextWindow::default(),
            "повтор",
            Utc::now(),
        )
        .await;
        assert!(matches!(out, Some(v) if !v.relevant));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_submissions_serialize_in_order() {
        let clf = Arc::new(ScriptedClassifier {
            script: Mutex::new(vec![
                Ok(verdict(true, RiskLevel::Low)),
                Ok(verdict(true, RiskLevel::Low)),
            ]),
            seen_context: Mutex::new(vec![]),
        });
        let store = Arc::new(ContextStore::new());
        let (handle, _worker) = spawn(clf.clone(), store.clone(), ContextWindow::default());

        let h1 = handle.clone();
        let h2 = handle.clone();
        let (r1, r2) = tokio::join!(
            h1.classify("C1".to_string()),
            h2.classify("C2".to_string())
        );
        assert!(r1.is_some() && r2.is_some());

        // whichever ran second must have seen exactly one context record
        let ctxs = clf.seen_context.lock().unwrap();
        assert!(ctxs[0].is_empty());
        assert_eq!(ctxs[1].len(), 1);
    }
}
