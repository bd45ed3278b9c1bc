//! Notification gating and fan-out.
//!
//! The gate is a pure function of verdict + wall-clock time; the fan-out
//! triggers voice playback and the push webhook concurrently and tolerates
//! either failing.

pub mod webhook;

use chrono::{Local, NaiveTime};
use metrics::counter;
use tracing::{info, warn};

use crate::audio::PlaybackHandle;
use crate::classify::{RiskLevel, Verdict};
use crate::notify::webhook::WebhookSink;

/// Daily time window for medium-risk alerts. May wrap midnight
/// (e.g. 22:00–04:00); start is inclusive, end exclusive.
#[derive(Debug, Clone, Copy)]
pub struct NotifyWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl NotifyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse from "HH:MM" pairs.
    pub fn parse(start: &str, end: &str) -> anyhow::Result<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M")?;
        let end = NaiveTime::parse_from_str(end, "%H:%M")?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            now >= self.start && now < self.end
        } else {
            // wraps midnight
            now >= self.start || now < self.end
        }
    }
}

impl Default for NotifyWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(22, 0, 0).expect("valid time"),
        }
    }
}

/// Pure notification decision. High always fires; medium only inside the
/// daily window; everything else stays silent.
pub fn should_notify(verdict: Option<&Verdict>, now: NaiveTime, window: &NotifyWindow) -> bool {
    let Some(v) = verdict else {
        info!("no verdict, notification skipped");
        return false;
    };
    if !v.relevant {
        info!("verdict not relevant, notification skipped");
        return false;
    }
    match v.risk_level {
        RiskLevel::None | RiskLevel::Low => {
            info!(risk = ?v.risk_level, "risk too low, no notification needed");
            false
        }
        RiskLevel::High => true,
        RiskLevel::Medium => {
            let allowed = window.contains(now);
            if !allowed {
                info!("outside allowed window for medium risk, notification skipped");
            }
            allowed
        }
    }
}

/// Fan-out: voice playback plus optional push webhook.
pub struct Notifier {
    window: NotifyWindow,
    sink: Option<WebhookSink>,
    playback: PlaybackHandle,
}

impl Notifier {
    pub fn new(window: NotifyWindow, sink: Option<WebhookSink>, playback: PlaybackHandle) -> Self {
        Self {
            window,
            sink,
            playback,
        }
    }

    /// Gate on the verdict and, if it passes, run playback and the push
    /// concurrently. A failed push never prevents playback and vice versa.
    pub async fn notify(&self, verdict: Option<&Verdict>) {
        let now = Local::now().time();
        if !should_notify(verdict, now, &self.window) {
            return;
        }
        // should_notify is false for None, so this cannot miss.
        let Some(v) = verdict else { return };

        counter!("notifications_total").increment(1);
        info!(risk = ?v.risk_level, summary = %v.summary, "notifying");

        let speech = self.playback.speak(v.summary.clone());
        let push = async {
            match &self.sink {
                Some(sink) => {
                    if let Err(e) = sink.send(v.risk_level.capitalized(), &v.summary).await {
                        counter!("push_failures_total").increment(1);
                        warn!(error = ?e, "push sink delivery failed");
                    }
                }
                None => warn!("no push sink configured, skipping webhook"),
            }
        };

        // Playback errors are contained inside the playback worker.
        tokio::join!(speech, push);
    }
}
