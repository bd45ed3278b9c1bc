// src/ingest/mod.rs
pub mod poller;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message as delivered by a source, newest-first within a fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: i64,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Which path delivered an item. Both feed the same dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Poll,
    Realtime,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Poll => "poll",
            Origin::Realtime => "realtime",
        }
    }
}

/// Ephemeral unit of work handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundItem {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
}

impl From<ChannelMessage> for InboundItem {
    fn from(m: ChannelMessage) -> Self {
        Self {
            text: m.text,
            timestamp: m.timestamp,
            origin: Origin::Poll,
        }
    }
}

/// Upstream message source. Returns up to `limit` messages, newest first;
/// with `min_id` set, only messages with a strictly greater id.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_recent(
        &self,
        source_id: &str,
        limit: usize,
        min_id: Option<i64>,
    ) -> Result<Vec<ChannelMessage>>;
}

/// Polls a JSON endpoint per source:
/// `GET {base_url}/{source_id}?limit=N[&min_id=K]` -> `[{id, text, timestamp}]`.
pub struct HttpSourceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSourceClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("air-raid-monitor/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_recent(
        &self,
        source_id: &str,
        limit: usize,
        min_id: Option<i64>,
    ) -> Result<Vec<ChannelMessage>> {
        let mut url = format!(
            "{}/{}?limit={}",
            self.base_url.trim_end_matches('/'),
            source_id,
            limit
        );
        if let Some(min) = min_id {
            url.push_str(&format!("&min_id={min}"));
        }

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fetch from source '{source_id}' failed"))?
            .error_for_status()
            .with_context(|| format!("source '{source_id}' returned error status"))?;

        let mut messages: Vec<ChannelMessage> = resp
            .json()
            .await
            .with_context(|| format!("source '{source_id}' returned invalid JSON"))?;

        // Normalize to newest-first regardless of what the endpoint did.
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        messages.truncate(limit);
        Ok(messages)
    }
}
