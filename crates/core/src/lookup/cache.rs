//! Batch-scoped lookup cache with a shared rate-limit gate.
//!
//! One instance is built per batch and injected wherever resolutions are
//! needed. Misses funnel through a single gate that spaces external calls
//! by the configured minimum interval, shared across all ids. A rate-limit
//! response triggers one cool-down and exactly one retry; any persistent
//! failure is cached as the `UNKNOWN` marker so one bad id cannot cause a
//! retry storm inside a batch.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::batch::LocationInfo;
use crate::config::RegistryConfig;
use crate::metrics;

use super::types::{LookupClient, LookupError, Resolved};

/// Cache and rate limiter in front of a [`LookupClient`].
pub struct LookupCache {
    client: Arc<dyn LookupClient>,
    min_interval: Duration,
    cooldown: Duration,
    entries: RwLock<HashMap<String, LocationInfo>>,
    // Start time of the most recent external call. Held across the call so
    // concurrent misses line up behind one another.
    gate: Mutex<Option<Instant>>,
    audit: Option<(AuditHandle, String)>,
}

impl LookupCache {
    pub fn new(client: Arc<dyn LookupClient>, config: &RegistryConfig) -> Self {
        Self {
            client,
            min_interval: Duration::from_millis(config.min_interval_ms),
            cooldown: Duration::from_secs(config.cooldown_secs),
            entries: RwLock::new(HashMap::new()),
            gate: Mutex::new(None),
            audit: None,
        }
    }

    /// Emit a lookup audit event for every resolution in the given batch.
    pub fn with_audit(mut self, handle: AuditHandle, batch_id: impl Into<String>) -> Self {
        self.audit = Some((handle, batch_id.into()));
        self
    }

    /// Resolve a tax id to its location metadata.
    ///
    /// Every outcome is cached for the lifetime of this instance, including
    /// the `UNKNOWN` marker written after a persistent failure.
    pub async fn resolve(&self, tax_id: &str) -> Result<Resolved, LookupError> {
        let id = tax_id.trim();
        if id.is_empty() {
            return Err(LookupError::InvalidId("blank id".to_string()));
        }

        if let Some(found) = self.entries.read().await.get(id).cloned() {
            metrics::LOOKUP_CACHE_HITS.inc();
            return Ok(self.finish(id, found, true).await);
        }

        let mut last_call = self.gate.lock().await;

        // Another task may have resolved this id while we waited for the gate.
        if let Some(found) = self.entries.read().await.get(id).cloned() {
            metrics::LOOKUP_CACHE_HITS.inc();
            return Ok(self.finish(id, found, true).await);
        }

        Self::wait_for_slot(&mut last_call, self.min_interval).await;
        metrics::LOOKUP_CALLS.inc();
        let mut outcome = self.client.fetch(id).await;

        if matches!(outcome, Err(LookupError::RateLimited)) {
            metrics::LOOKUP_RATE_LIMITED.inc();
            warn!(
                tax_id = id,
                cooldown_secs = self.cooldown.as_secs(),
                "Registry rate limited, cooling down before single retry"
            );
            sleep(self.cooldown).await;
            *last_call = Some(Instant::now());
            metrics::LOOKUP_CALLS.inc();
            outcome = self.client.fetch(id).await;
            if matches!(outcome, Err(LookupError::RateLimited)) {
                metrics::LOOKUP_RATE_LIMITED.inc();
            }
        }

        let location = match outcome {
            Ok(location) => {
                debug!(tax_id = id, city = %location.city, state = %location.state, "Registry resolved");
                location
            }
            Err(e) => {
                warn!(tax_id = id, error = %e, "Registry lookup failed, caching unknown marker");
                LocationInfo::unknown()
            }
        };

        self.entries
            .write()
            .await
            .insert(id.to_string(), location.clone());
        drop(last_call);

        Ok(self.finish(id, location, false).await)
    }

    /// Number of cached entries, failures included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn wait_for_slot(last_call: &mut Option<Instant>, min_interval: Duration) {
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    async fn finish(&self, tax_id: &str, location: LocationInfo, cache_hit: bool) -> Resolved {
        if let Some((handle, batch_id)) = &self.audit {
            handle
                .emit(AuditEvent::LookupResolved {
                    batch_id: batch_id.clone(),
                    tax_id: tax_id.to_string(),
                    city: location.city.clone(),
                    state: location.state.clone(),
                    cache_hit,
                })
                .await;
        }
        Resolved {
            location,
            cache_hit,
        }
    }
}
