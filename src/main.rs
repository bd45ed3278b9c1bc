//! air-raid-monitor — Binary Entrypoint
//! Wires the ingestion pipeline (pollers → dispatcher → classification →
//! notification), the playback queue, and the Axum control surface.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use air_raid_monitor::audio::output::{existing_clip, CpalBackend};
use air_raid_monitor::audio::{self, HttpTtsSynthesizer};
use air_raid_monitor::classify::queue::{self as classify_queue, ContextWindow};
use air_raid_monitor::classify::OpenAiClassifier;
use air_raid_monitor::config::MonitorConfig;
use air_raid_monitor::dispatch::{Dispatcher, ItemSink};
use air_raid_monitor::ingest::poller::{spawn_poller, ChannelSource, PollerCfg};
use air_raid_monitor::ingest::{HttpSourceClient, SourceClient};
use air_raid_monitor::metrics::Metrics;
use air_raid_monitor::notify::webhook::WebhookSink;
use air_raid_monitor::notify::{Notifier, NotifyWindow};
use air_raid_monitor::store::{self, ContextStore};
use air_raid_monitor::{create_router, AppState, ThreatFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("air_raid_monitor=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = MonitorConfig::load();
    if cfg.sources.is_empty() {
        tracing::warn!("no sources configured — no channels will be monitored");
    }

    let metrics = Metrics::init();

    // --- Context store + retention ---
    let store = Arc::new(ContextStore::new());
    store::spawn_purge_task(
        Arc::clone(&store),
        Duration::days(cfg.retention_days),
        StdDuration::from_secs(cfg.purge_interval_secs),
    );

    // --- Classification queue ---
    let classifier = Arc::new(OpenAiClassifier::new(
        cfg.classifier_api_key.clone(),
        cfg.classifier_model.clone(),
    ));
    let window = ContextWindow {
        lookback: Duration::seconds(cfg.context_lookback_secs),
        cap: cfg.context_cap,
    };
    let (classify, _classify_worker) = classify_queue::spawn(classifier, Arc::clone(&store), window);

    // --- Playback queue + keep-alive ---
    let synth = Arc::new(HttpTtsSynthesizer::new(
        cfg.tts_endpoint.clone(),
        cfg.tts_voice.clone(),
        cfg.tts_language.clone(),
    ));
    let backend = Arc::new(CpalBackend::new(cfg.audio_device.clone()));
    let (playback, _playback_worker) = audio::spawn(synth, backend, existing_clip(cfg.chime_path.clone()));

    if let Some(silence) = existing_clip(cfg.silence_path.clone()) {
        audio::spawn_keepalive(
            playback.clone(),
            silence,
            StdDuration::from_secs(cfg.keepalive_secs),
        );
    }

    // --- Notification fan-out ---
    let sink = cfg.webhook_url.clone().map(WebhookSink::new);
    if sink.is_none() {
        tracing::warn!("HA_WEBHOOK_URL is not set, push notifications disabled");
    }
    let notify_window = match NotifyWindow::parse(&cfg.notify_start, &cfg.notify_end) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = ?e, "invalid notify window in config, using 08:00-22:00");
            NotifyWindow::default()
        }
    };
    let notifier = Arc::new(Notifier::new(notify_window, sink.clone(), playback.clone()));

    // --- Pollers, one task per source ---
    let filter = ThreatFilter::default_patterns();
    let dispatcher = Arc::new(Dispatcher::new(
        filter.clone(),
        classify.clone(),
        notifier,
    ));
    let item_sink: Arc<dyn ItemSink> = dispatcher;
    let client: Arc<dyn SourceClient> = Arc::new(HttpSourceClient::new(cfg.source_base_url.clone()));
    let poll_cfg = PollerCfg {
        interval: StdDuration::from_secs(cfg.poll_interval_secs),
        backoff: StdDuration::from_secs(cfg.poll_backoff_secs),
        page_size: cfg.poll_page_size,
    };
    for spec in &cfg.sources {
        spawn_poller(
            ChannelSource::new(spec.id.clone(), spec.name.clone()),
            Arc::clone(&client),
            Arc::clone(&item_sink),
            poll_cfg,
        );
        tracing::info!(source = %spec.name, "listening");
    }

    // --- Control surface ---
    let state = AppState {
        filter,
        classify,
        store,
        playback,
        sink,
        context_lookback_secs: cfg.context_lookback_secs,
        context_cap: cfg.context_cap,
    };
    let router = create_router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, "control surface listening");
    axum::serve(listener, router).await?;
    Ok(())
}
