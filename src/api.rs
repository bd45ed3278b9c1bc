//! HTTP control surface: health check, manual classification and TTS
//! triggers, and listings of stored context records. Consumes the core, never
//! drives it — the pollers feed the pipeline on their own.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use tower_http::cors::CorsLayer;

use crate::classify::queue::ClassifyHandle;
use crate::classify::Verdict;
use crate::filter::ThreatFilter;
use crate::notify::webhook::WebhookSink;
use crate::audio::PlaybackHandle;
use crate::store::{ContextRecord, ContextStore};

#[derive(Clone)]
pub struct AppState {
    pub filter: ThreatFilter,
    pub classify: ClassifyHandle,
    pub store: Arc<ContextStore>,
    pub playback: PlaybackHandle,
    pub sink: Option<WebhookSink>,
    pub context_lookback_secs: i64,
    pub context_cap: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/test", post(test_classify))
        .route("/tts", post(test_tts))
        .route("/hook", post(test_hook))
        .route("/messages", get(list_messages))
        .route("/messages/last", get(list_recent_messages))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct HealthResp {
    status: &'static str,
}

async fn health() -> Json<HealthResp> {
    Json(HealthResp { status: "ok" })
}

#[derive(serde::Deserialize)]
struct TextReq {
    text: Option<String>,
}

#[derive(serde::Serialize)]
struct ErrorResp {
    error: &'static str,
}

#[derive(serde::Serialize)]
#[serde(untagged)]
enum TestResp {
    Skipped {
        matched: bool,
        message: &'static str,
        text: String,
    },
    Classified {
        matched: bool,
        input: String,
        analysis: Option<Verdict>,
    },
}

/// Manual classify-and-respond: runs the same filter + queue as the pipeline
/// but never notifies.
async fn test_classify(
    State(state): State<AppState>,
    Json(body): Json<TextReq>,
) -> Result<Json<TestResp>, (StatusCode, Json<ErrorResp>)> {
    let text = non_empty_text(body)?;

    if !state.filter.is_match(&text) {
        return Ok(Json(TestResp::Skipped {
            matched: false,
            message: "Filter not matched — skipping.",
            text,
        }));
    }

    let analysis = state.classify.classify(text.clone()).await;
    Ok(Json(TestResp::Classified {
        matched: true,
        input: text,
        analysis,
    }))
}

#[derive(serde::Serialize)]
struct TtsResp {
    status: &'static str,
    text: String,
}

/// Queue a speech playback and return immediately.
async fn test_tts(
    State(state): State<AppState>,
    Json(body): Json<TextReq>,
) -> Result<Json<TtsResp>, (StatusCode, Json<ErrorResp>)> {
    let text = non_empty_text(body)?;

    let playback = state.playback.clone();
    let spoken = text.clone();
    tokio::spawn(async move {
        playback.speak(spoken).await;
        tracing::info!("manual TTS playback finished");
    });

    Ok(Json(TtsResp {
        status: "ok",
        text,
    }))
}

#[derive(serde::Serialize)]
struct HookResp {
    status: &'static str,
}

/// Send a test push through the configured sink.
async fn test_hook(
    State(state): State<AppState>,
    Json(body): Json<TextReq>,
) -> Result<Json<HookResp>, (StatusCode, Json<ErrorResp>)> {
    let text = body
        .text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "This is a test notification from Air Raid Alerts.".to_string());

    if let Some(sink) = &state.sink {
        if let Err(e) = sink.send("TEST", &text).await {
            tracing::warn!(error = ?e, "test webhook failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResp {
                    error: "Webhook delivery failed.",
                }),
            ));
        }
    } else {
        tracing::warn!("no push sink configured, test hook skipped");
    }

    Ok(Json(HookResp { status: "ok" }))
}

async fn list_messages(State(state): State<AppState>) -> Json<Vec<ContextRecord>> {
    Json(state.store.snapshot_all())
}

async fn list_recent_messages(State(state): State<AppState>) -> Json<Vec<ContextRecord>> {
    let window = state.store.recent_window_desc(
        Utc::now(),
        Duration::seconds(state.context_lookback_secs),
        state.context_cap,
    );
    Json(window)
}

fn non_empty_text(body: TextReq) -> Result<String, (StatusCode, Json<ErrorResp>)> {
    body.text
        .filter(|t| !t.trim().is_empty())
        .ok_or((
            StatusCode::BAD_REQUEST,
            Json(ErrorResp {
                error: "Missing or invalid text field.",
            }),
        ))
}
