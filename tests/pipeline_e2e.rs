// tests/pipeline_e2e.rs
//
// End-to-end pipeline runs: scripted source -> poller -> dispatcher ->
// classification queue -> gate -> fan-out, with a local HTTP server standing
// in for the push sink and doubles for the classifier and audio stack.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{routing::post, Json, Router};
use chrono::Utc;
use tokio::sync::mpsc;

use air_raid_monitor::audio::{self, AudioBackend, SpeechSynthesizer};
use air_raid_monitor::classify::queue::{self as classify_queue, ContextWindow};
use air_raid_monitor::classify::{Classifier, RiskLevel, ThreatType, Verdict};
use air_raid_monitor::dispatch::Dispatcher;
use air_raid_monitor::ingest::poller::{poll_once, ChannelSource};
use air_raid_monitor::ingest::{ChannelMessage, SourceClient};
use air_raid_monitor::notify::webhook::WebhookSink;
use air_raid_monitor::notify::{Notifier, NotifyWindow};
use air_raid_monitor::store::ContextStore;
use air_raid_monitor::ThreatFilter;

struct ScriptedSource {
    pages: Mutex<Vec<Vec<ChannelMessage>>>,
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn fetch_recent(
        &self,
        _source_id: &str,
        _limit: usize,
        _min_id: Option<i64>,
    ) -> Result<Vec<ChannelMessage>> {
        Ok(self.pages.lock().unwrap().remove(0))
    }
}

struct FixedClassifier {
    verdict: Verdict,
    calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn analyze(&self, _context: &[String], _current: &str) -> Result<Verdict> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.verdict.clone())
    }
}

struct FakeSynth;

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, _text: &str, out: &Path) -> Result<()> {
        tokio::fs::write(out, b"mp3").await?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBackend {
    played: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl AudioBackend for RecordingBackend {
    async fn play(&self, path: &Path) -> Result<()> {
        self.played.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Local webhook receiver; returns its URL and a stream of received payloads.
async fn spawn_hook_server() -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    let app = Router::new().route(
        "/hook",
        post(move |Json(v): Json<serde_json::Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(v);
                "ok"
            }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

fn high_risk_verdict() -> Verdict {
    Verdict {
        relevant: true,
        risk_level: RiskLevel::High,
        threat_type: ThreatType::CruiseMissile,
        location_match: vec!["Бориспіль".into()],
        trajectory_threat: true,
        reason: "стратегическая авиация в воздухе".into(),
        summary: "Ту-160 в воздухе, возможен пуск крылатых ракет".into(),
        language: "ru".into(),
    }
}

fn message(id: i64, text: &str) -> ChannelMessage {
    ChannelMessage {
        id,
        text: text.to_string(),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn matched_high_risk_post_triggers_playback_and_push() {
    let (hook_url, mut hooks) = spawn_hook_server().await;

    let store = Arc::new(ContextStore::new());
    let calls = Arc::new(Mutex::new(0));
    let classifier = Arc::new(FixedClassifier {
        verdict: high_risk_verdict(),
        calls: Arc::clone(&calls),
    });
    let (classify, _cw) =
        classify_queue::spawn(classifier, Arc::clone(&store), ContextWindow::default());

    let backend = Arc::new(RecordingBackend::default());
    let (playback, _pw) = audio::spawn(Arc::new(FakeSynth), backend.clone(), None);

    let sink = WebhookSink::new(hook_url).with_retries(1);
    let notifier = Arc::new(Notifier::new(
        NotifyWindow::default(),
        Some(sink),
        playback,
    ));
    let dispatcher = Dispatcher::new(ThreatFilter::default_patterns(), classify, notifier);

    // first cycle seeds the cursor, second delivers the threat post
    let client = ScriptedSource {
        pages: Mutex::new(vec![
            vec![message(1, "вечірнє зведення")],
            vec![message(2, "Бориспіль: курс Ту-160")],
        ]),
    };
    let mut source = ChannelSource::new("war_monitor", "@war_monitor");
    poll_once(&mut source, &client, &dispatcher, 5).await.unwrap();
    poll_once(&mut source, &client, &dispatcher, 5).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(store.len(), 1, "high-risk relevant verdict must be stored");
    assert_eq!(
        backend.played.lock().unwrap().len(),
        1,
        "summary must reach the audio device"
    );

    let payload = tokio::time::timeout(Duration::from_secs(5), hooks.recv())
        .await
        .expect("webhook not delivered")
        .unwrap();
    assert_eq!(payload["risk_level"], "High");
    assert_eq!(
        payload["text"],
        "Ту-160 в воздухе, возможен пуск крылатых ракет"
    );
}

#[tokio::test]
async fn excluded_post_never_reaches_the_classifier() {
    let store = Arc::new(ContextStore::new());
    let calls = Arc::new(Mutex::new(0));
    let classifier = Arc::new(FixedClassifier {
        verdict: high_risk_verdict(),
        calls: Arc::clone(&calls),
    });
    let (classify, _cw) =
        classify_queue::spawn(classifier, Arc::clone(&store), ContextWindow::default());

    let backend = Arc::new(RecordingBackend::default());
    let (playback, _pw) = audio::spawn(Arc::new(FakeSynth), backend.clone(), None);
    let notifier = Arc::new(Notifier::new(NotifyWindow::default(), None, playback));
    let dispatcher = Dispatcher::new(ThreatFilter::default_patterns(), classify, notifier);

    let client = ScriptedSource {
        pages: Mutex::new(vec![
            vec![message(1, "ранкове зведення")],
            // matches the include list (Ту-160) but also the Kyiv exclusion
            vec![message(2, "Київ: у напрямку міста Ту-160")],
        ]),
    };
    let mut source = ChannelSource::new("kyiv_live", "@kyiv_live");
    poll_once(&mut source, &client, &dispatcher, 5).await.unwrap();
    poll_once(&mut source, &client, &dispatcher, 5).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 0, "excluded text must not be classified");
    assert!(store.is_empty(), "no context record for excluded text");
    assert!(backend.played.lock().unwrap().is_empty());
}

#[tokio::test]
async fn irrelevant_verdict_is_stored_nowhere_and_stays_silent() {
    let store = Arc::new(ContextStore::new());
    let calls = Arc::new(Mutex::new(0));
    let classifier = Arc::new(FixedClassifier {
        verdict: Verdict {
            relevant: false,
            risk_level: RiskLevel::None,
            threat_type: ThreatType::Unknown,
            location_match: vec![],
            trajectory_threat: false,
            reason: "дубликат".into(),
            summary: "-".into(),
            language: "ru".into(),
        },
        calls: Arc::clone(&calls),
    });
    let (classify, _cw) =
        classify_queue::spawn(classifier, Arc::clone(&store), ContextWindow::default());

    let backend = Arc::new(RecordingBackend::default());
    let (playback, _pw) = audio::spawn(Arc::new(FakeSynth), backend.clone(), None);
    let notifier = Arc::new(Notifier::new(NotifyWindow::default(), None, playback));
    let dispatcher = Dispatcher::new(ThreatFilter::default_patterns(), classify, notifier);

    let client = ScriptedSource {
        pages: Mutex::new(vec![
            vec![message(1, "зведення")],
            vec![message(2, "пуски КР з акваторії")],
        ]),
    };
    let mut source = ChannelSource::new("monitor", "@monitor");
    poll_once(&mut source, &client, &dispatcher, 5).await.unwrap();
    poll_once(&mut source, &client, &dispatcher, 5).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(store.is_empty());
    assert!(backend.played.lock().unwrap().is_empty());
}
