// src/dispatch.rs
//! Applies the relevance filter to inbound items and pushes matches through
//! classification and notification. Nothing here may propagate an error back
//! into a poll loop; a bad item is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info};

use crate::classify::queue::ClassifyHandle;
use crate::filter::ThreatFilter;
use crate::ingest::InboundItem;
use crate::notify::Notifier;

/// Delivery seam between pollers and the dispatcher, so poller tests can
/// record items instead of classifying them.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn deliver(&self, item: InboundItem, source_name: &str);
}

pub struct Dispatcher {
    filter: ThreatFilter,
    classify: ClassifyHandle,
    notifier: Arc<Notifier>,
}

impl Dispatcher {
    pub fn new(filter: ThreatFilter, classify: ClassifyHandle, notifier: Arc<Notifier>) -> Self {
        Self {
            filter,
            classify,
            notifier,
        }
    }

    /// Filter, classify, notify. Serializes with fetch advancement because
    /// the poller awaits it per item.
    pub async fn dispatch(&self, item: InboundItem, source_name: &str) {
        if !self.filter.is_match(&item.text) {
            counter!("dispatch_skipped_total").increment(1);
            debug!(
                source = %source_name,
                origin = item.origin.as_str(),
                text = %item.text,
                "skipped message"
            );
            return;
        }

        counter!("dispatch_matched_total").increment(1);
        info!(
            source = %source_name,
            origin = item.origin.as_str(),
            text = %item.text,
            "matched message, classifying"
        );

        // A failed classification surfaces as None and is simply not notified.
        let verdict = self.classify.classify(item.text).await;
        self.notifier.notify(verdict.as_ref()).await;
    }
}

#[async_trait]
impl ItemSink for Dispatcher {
    async fn deliver(&self, item: InboundItem, source_name: &str) {
        self.dispatch(item, source_name).await;
    }
}
