// src/ingest/poller.rs
//! Per-source polling loop with a cursor, an explicit poll state machine, and
//! fixed back-off on fetch errors. Each source owns its own task; sources are
//! independent of each other.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dispatch::ItemSink;
use crate::ingest::{InboundItem, SourceClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    BackingOff,
}

/// Per-source mutable state, owned exclusively by its poller task.
#[derive(Debug)]
pub struct ChannelSource {
    pub id: String,
    pub name: String,
    pub cursor: Option<i64>,
    pub initialized: bool,
    pub state: PollState,
}

impl ChannelSource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cursor: None,
            initialized: false,
            state: PollState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerCfg {
    pub interval: Duration,
    pub backoff: Duration,
    pub page_size: usize,
}

impl Default for PollerCfg {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            backoff: Duration::from_secs(60),
            page_size: 5,
        }
    }
}

/// One fetch/dispatch cycle. Returns how many items were handed to the sink.
///
/// The first successful fetch only seeds the cursor from the newest item so
/// that a restart never replays channel history. In steady state, items above
/// the cursor are dispatched oldest-to-newest, each awaited before the next,
/// and the cursor advances to the newest fetched id.
pub async fn poll_once(
    source: &mut ChannelSource,
    client: &dyn SourceClient,
    sink: &dyn ItemSink,
    page_size: usize,
) -> Result<usize> {
    source.state = PollState::Fetching;

    let messages = client
        .fetch_recent(&source.id, page_size, source.cursor)
        .await?;

    if messages.is_empty() {
        debug!(source = %source.name, "no messages");
        source.state = PollState::Idle;
        return Ok(0);
    }

    let newest_id = messages[0].id;

    if !source.initialized {
        source.cursor = Some(newest_id);
        source.initialized = true;
        info!(source = %source.name, cursor = newest_id, "cursor seeded, backlog skipped");
        source.state = PollState::Idle;
        return Ok(0);
    }

    let cursor = source.cursor;
    let mut fresh: Vec<_> = messages
        .into_iter()
        .filter(|m| cursor.map_or(true, |c| m.id > c))
        .collect();
    source.cursor = Some(newest_id.max(cursor.unwrap_or(i64::MIN)));

    // Source order is newest-first; deliver chronologically.
    fresh.reverse();
    let delivered = fresh.len();
    for message in fresh {
        counter!("poll_items_total").increment(1);
        sink.deliver(InboundItem::from(message), &source.name).await;
    }

    source.state = PollState::Idle;
    Ok(delivered)
}

/// Spawn the poll loop for one source: an immediate first poll, then a fixed
/// interval. A tick arriving while a cycle is still running is skipped, not
/// queued. A fetch error parks the source for `backoff`, then polls again
/// right away and restarts the interval fresh from that recovery poll.
pub fn spawn_poller(
    mut source: ChannelSource,
    client: Arc<dyn SourceClient>,
    sink: Arc<dyn ItemSink>,
    cfg: PollerCfg,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            counter!("poll_ticks_total").increment(1);

            loop {
                match poll_once(&mut source, &*client, &*sink, cfg.page_size).await {
                    Ok(n) => {
                        if n > 0 {
                            debug!(source = %source.name, dispatched = n, "poll cycle done");
                        }
                        break;
                    }
                    Err(e) => {
                        counter!("poll_errors_total").increment(1);
                        warn!(error = ?e, source = %source.name, backoff_secs = cfg.backoff.as_secs(), "fetch failed, backing off");
                        source.state = PollState::BackingOff;
                        tokio::time::sleep(cfg.backoff).await;
                        ticker.reset();
                        source.state = PollState::Idle;
                        // loop back into an immediate recovery poll
                    }
                }
            }
        }
    })
}
