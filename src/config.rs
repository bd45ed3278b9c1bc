// src/config.rs
//! Runtime configuration: a TOML file with env-var overrides for secrets and
//! deployment-specific values. `"ENV"` in a secret field means "read the
//! well-known environment variable instead".

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";
pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Stable id, also the path segment of the fetch endpoint.
    pub id: String,
    /// Display name for logs.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub bind_addr: String,

    /// Watched channels. `MONITOR_SOURCES` (comma-separated ids) overrides.
    pub sources: Vec<SourceSpec>,
    pub source_base_url: String,
    pub poll_interval_secs: u64,
    pub poll_backoff_secs: u64,
    pub poll_page_size: usize,

    pub context_lookback_secs: i64,
    pub context_cap: usize,
    pub retention_days: i64,
    pub purge_interval_secs: u64,

    /// Daily window for medium-risk alerts, "HH:MM". May wrap midnight.
    pub notify_start: String,
    pub notify_end: String,
    /// Push sink; `HA_WEBHOOK_URL` overrides. Absent means skip the push.
    pub webhook_url: Option<String>,

    pub classifier_model: String,
    /// "ENV" -> OPENAI_API_KEY.
    pub classifier_api_key: String,

    pub tts_endpoint: String,
    pub tts_voice: String,
    pub tts_language: String,

    pub audio_device: String,
    pub chime_path: Option<PathBuf>,
    pub silence_path: Option<PathBuf>,
    pub keepalive_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".into(),
            sources: Vec::new(),
            source_base_url: "http://localhost:8085/channels".into(),
            poll_interval_secs: 20,
            poll_backoff_secs: 60,
            poll_page_size: 5,
            context_lookback_secs: 3600,
            context_cap: 7,
            retention_days: 2,
            purge_interval_secs: 12 * 60 * 60,
            notify_start: "08:00".into(),
            notify_end: "22:00".into(),
            webhook_url: None,
            classifier_model: "gpt-5-mini".into(),
            classifier_api_key: "ENV".into(),
            tts_endpoint: "http://localhost:8086/tts".into(),
            tts_voice: "ru-RU-SvetlanaNeural".into(),
            tts_language: "ru-RU".into(),
            audio_device: "soundcore Select 2S".into(),
            chime_path: Some(PathBuf::from("assets/chime.mp3")),
            silence_path: Some(PathBuf::from("assets/silence.mp3")),
            keepalive_secs: 600,
        }
    }
}

impl MonitorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("cannot read config {}", path.as_ref().display()))?;
        let mut cfg: MonitorConfig = toml::from_str(&data).context("invalid config TOML")?;
        cfg.apply_env();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load from `MONITOR_CONFIG_PATH` / the default path, falling back to
    /// built-in defaults (plus env overrides) when no file exists.
    pub fn load() -> Self {
        let path = env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match Self::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = ?e, path = %path, "config file not loaded, using defaults");
                let mut cfg = Self::default();
                cfg.apply_env();
                cfg.sanitize();
                cfg
            }
        }
    }

    fn apply_env(&mut self) {
        if self.classifier_api_key.trim().eq_ignore_ascii_case("env") {
            self.classifier_api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        }
        if let Ok(url) = env::var("HA_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.webhook_url = Some(url);
            }
        }
        if let Ok(raw) = env::var("MONITOR_SOURCES") {
            let sources: Vec<SourceSpec> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|id| SourceSpec {
                    id: id.to_string(),
                    name: format!("@{id}"),
                })
                .collect();
            if !sources.is_empty() {
                self.sources = sources;
            }
        }
    }

    fn sanitize(&mut self) {
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = 20;
        }
        if self.poll_backoff_secs == 0 {
            self.poll_backoff_secs = 60;
        }
        if self.poll_page_size == 0 {
            self.poll_page_size = 5;
        }
        if self.context_cap == 0 {
            self.context_cap = 7;
        }
        if self.context_lookback_secs <= 0 {
            self.context_lookback_secs = 3600;
        }
        if self.retention_days <= 0 {
            self.retention_days = 2;
        }
        if self.keepalive_secs == 0 {
            self.keepalive_secs = 600;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadence() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.poll_interval_secs, 20);
        assert_eq!(cfg.poll_backoff_secs, 60);
        assert_eq!(cfg.poll_page_size, 5);
        assert_eq!(cfg.context_cap, 7);
        assert_eq!(cfg.context_lookback_secs, 3600);
        assert_eq!(cfg.retention_days, 2);
        assert_eq!(cfg.keepalive_secs, 600);
    }

    #[test]
    fn toml_overrides_defaults_and_sanitize_fixes_zeros() {
        let raw = r#"
            poll_interval_secs = 0
            notify_start = "22:00"
            notify_end = "04:00"

            [[sources]]
            id = "war_monitor"
            name = "@war_monitor"
        "#;
        let mut cfg: MonitorConfig = toml::from_str(raw).unwrap();
        cfg.sanitize();
        assert_eq!(cfg.poll_interval_secs, 20); // zero is repaired
        assert_eq!(cfg.notify_start, "22:00");
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].id, "war_monitor");
    }
}
