use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;

/// Push sink payload: capitalized risk label plus the summary text.
#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    risk_level: &'a str,
    text: &'a str,
}

/// HTTP push sink (e.g. a Home Assistant webhook).
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub async fn send(&self, risk_level: &str, text: &str) -> Result<()> {
        let payload = PushPayload { risk_level, text };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(retry_delay(attempt)).await;
                            continue;
                        }
                        return Err(anyhow!("push webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(anyhow!("push webhook request failed: {e}"));
                }
            }
        }
    }
}

/// Exponential delay before retry `attempt + 1`, capped at 32 s.
fn retry_delay(attempt: u8) -> Duration {
    Duration::from_millis(500u64 << u32::from(attempt.saturating_sub(1)).min(6))
}
