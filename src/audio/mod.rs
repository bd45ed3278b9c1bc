//! Voice playback pipeline: speech synthesis into a temp file, a
//! single-flight playback queue over the output device, and a periodic
//! keep-alive clip so the speaker never sleeps.

pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// External speech-synthesis service: text in, compressed audio file out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()>;
}

/// Something that can play an audio file to completion. `Ok(())` with no
/// device present is a valid outcome (audio is optional).
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn play(&self, path: &Path) -> Result<()>;
}

/// TTS over HTTP: `POST {endpoint} { text, voice, language }` returning the
/// synthesized audio bytes.
pub struct HttpTtsSynthesizer {
    http: reqwest::Client,
    endpoint: String,
    voice: String,
    language: String,
}

impl HttpTtsSynthesizer {
    pub fn new(endpoint: String, voice: String, language: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("air-raid-monitor/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint,
            voice,
            language,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpTtsSynthesizer {
    async fn synthesize(&self, text: &str, out: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct TtsRequest<'a> {
            text: &'a str,
            voice: &'a str,
            language: &'a str,
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&TtsRequest {
                text,
                voice: &self.voice,
                language: &self.language,
            })
            .send()
            .await
            .context("TTS request failed")?
            .error_for_status()
            .context("TTS service returned error status")?;

        let audio = resp.bytes().await.context("TTS response body unreadable")?;
        tokio::fs::write(out, &audio)
            .await
            .with_context(|| format!("failed to write TTS audio to {}", out.display()))?;
        Ok(())
    }
}

enum PlaybackJob {
    /// Synthesize and play, preceded by the alert chime. `done` fires once
    /// the device has fully drained (or the task failed).
    Speak {
        text: String,
        done: oneshot::Sender<()>,
    },
    /// Play a pre-recorded clip as-is (keep-alive silence).
    Clip(PathBuf),
}

/// Cheap-to-clone submission handle for the playback queue.
#[derive(Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackJob>,
}

impl PlaybackHandle {
    /// Queue speech and wait until playback has actually finished. Failures
    /// inside the worker are logged, not returned; a dead worker resolves
    /// immediately.
    pub async fn speak(&self, text: String) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(PlaybackJob::Speak { text, done }).is_err() {
            warn!("playback worker is gone, dropping speech");
            return;
        }
        let _ = rx.await;
    }

    /// Fire-and-forget clip playback.
    pub fn enqueue_clip(&self, path: PathBuf) {
        if self.tx.send(PlaybackJob::Clip(path)).is_err() {
            warn!("playback worker is gone, dropping clip");
        }
    }
}

/// Spawn the single playback worker. Jobs run strictly in submission order;
/// a failed job is swallowed (logged) so the next one still runs.
pub fn spawn(
    synth: Arc<dyn SpeechSynthesizer>,
    backend: Arc<dyn AudioBackend>,
    chime: Option<PathBuf>,
) -> (PlaybackHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PlaybackJob>();
    let worker = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                PlaybackJob::Speak { text, done } => {
                    counter!("playback_jobs_total").increment(1);
                    if let Err(e) = speak_once(&*synth, &*backend, chime.as_deref(), &text).await {
                        counter!("playback_failures_total").increment(1);
                        warn!(error = ?e, "speech playback failed");
                    }
                    let _ = done.send(());
                }
                PlaybackJob::Clip(path) => {
                    if let Err(e) = backend.play(&path).await {
                        counter!("playback_failures_total").increment(1);
                        warn!(error = ?e, clip = %path.display(), "clip playback failed");
                    }
                }
            }
        }
    });
    (PlaybackHandle { tx }, worker)
}

/// One speech task: synthesize to a temp file, play chime then speech, and
/// always remove the temp file on the way out.
async fn speak_once(
    synth: &dyn SpeechSynthesizer,
    backend: &dyn AudioBackend,
    chime: Option<&Path>,
    text: &str,
) -> Result<()> {
    let out = std::env::temp_dir().join(format!("raid-tts-{}.mp3", Uuid::new_v4()));

    let result = synthesize_and_play(synth, backend, chime, text, &out).await;

    match tokio::fs::remove_file(&out).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(error = ?e, file = %out.display(), "failed to clean up TTS file"),
    }

    result
}

async fn synthesize_and_play(
    synth: &dyn SpeechSynthesizer,
    backend: &dyn AudioBackend,
    chime: Option<&Path>,
    text: &str,
    out: &Path,
) -> Result<()> {
    synth.synthesize(text, out).await?;
    if let Some(chime) = chime {
        backend.play(chime).await?;
    }
    backend.play(out).await?;
    debug!("speech playback finished");
    Ok(())
}

/// Periodically queue a silence clip through the same single-flight queue,
/// purely to keep the output device from disconnecting.
pub fn spawn_keepalive(
    handle: PlaybackHandle,
    silence: PathBuf,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // skip the immediate first tick
        loop {
            ticker.tick().await;
            info!("queuing silence playback to keep speaker awake");
            handle.enqueue_clip(silence.clone());
        }
    })
}
