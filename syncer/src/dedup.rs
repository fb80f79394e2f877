//! Analytics-event deduplication.
//!
//! Repeated identical evaluations within the TTL window produce one
//! analytics event instead of one per request.

use crate::cache::Cache;
use crate::metrics_defs::{EVENTS_SUPPRESSED, EVENTS_TRACKED};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One evaluation result considered for analytics delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationEvent {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    /// Flag key -> assigned variant key.
    pub results: HashMap<String, String>,
}

impl EvaluationEvent {
    /// Canonical fingerprint: identity, then `flag=variant` pairs sorted by
    /// flag key. Order-independent and content-sensitive.
    fn fingerprint(&self) -> String {
        let mut canonical = String::new();
        canonical.push_str(self.user_id.as_deref().unwrap_or(""));
        canonical.push('\n');
        canonical.push_str(self.device_id.as_deref().unwrap_or(""));
        let mut pairs: Vec<(&String, &String)> = self.results.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        for (flag, variant) in pairs {
            canonical.push('\n');
            canonical.push_str(flag);
            canonical.push('=');
            canonical.push_str(variant);
        }
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

/// Suppresses events whose fingerprint was already seen within the TTL
/// window, bounded by the cache capacity under memory pressure.
pub struct DeduplicationFilter {
    seen: Cache<String, ()>,
}

impl DeduplicationFilter {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        DeduplicationFilter {
            seen: Cache::new(capacity, ttl),
        }
    }

    /// True when the event should be forwarded to the analytics client.
    pub fn should_track(&self, event: &EvaluationEvent) -> bool {
        let fingerprint = event.fingerprint();
        if self.seen.get(&fingerprint).is_some() {
            counter!(EVENTS_SUPPRESSED).increment(1);
            return false;
        }
        self.seen.set(fingerprint, ());
        counter!(EVENTS_TRACKED).increment(1);
        true
    }
}

/// The consumed analytics delivery client. Batching and transport live
/// outside the core.
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    async fn log_event(&self, event: EvaluationEvent);
}

/// Hands events to the analytics client, dropping duplicates.
pub struct ExposureTracker {
    filter: DeduplicationFilter,
    client: Arc<dyn AnalyticsClient>,
}

impl ExposureTracker {
    pub fn new(filter: DeduplicationFilter, client: Arc<dyn AnalyticsClient>) -> Self {
        ExposureTracker { filter, client }
    }

    pub async fn track(&self, event: EvaluationEvent) {
        if self.filter.should_track(&event) {
            self.client.log_event(event).await;
        }
    }
}
