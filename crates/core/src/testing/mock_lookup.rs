//! Mock lookup client for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::batch::LocationInfo;
use crate::lookup::{LookupClient, LookupError};

/// Mock implementation of the LookupClient trait.
///
/// Provides controllable behavior for testing:
/// - Queue per-id responses (success or error), consumed in order
/// - Fall back to a configurable default location
/// - Track every fetch for call-count assertions
#[derive(Debug, Default)]
pub struct MockLookupClient {
    /// Default location returned when no queued response matches.
    default: Arc<RwLock<Option<LocationInfo>>>,
    /// Queued responses keyed by tax id, consumed front-first.
    responses: Arc<RwLock<HashMap<String, VecDeque<Result<LocationInfo, LookupError>>>>>,
    /// Recorded tax ids, one entry per fetch.
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockLookupClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the location returned when no queued response matches.
    pub async fn set_default(&self, location: LocationInfo) {
        *self.default.write().await = Some(location);
    }

    /// Queue one response for the given tax id.
    pub async fn push_response(&self, tax_id: &str, response: Result<LocationInfo, LookupError>) {
        self.responses
            .write()
            .await
            .entry(tax_id.to_string())
            .or_default()
            .push_back(response);
    }

    /// Tax ids fetched so far, in call order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    /// Number of fetches performed.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl LookupClient for MockLookupClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, tax_id: &str) -> Result<LocationInfo, LookupError> {
        self.calls.write().await.push(tax_id.to_string());

        if let Some(response) = self
            .responses
            .write()
            .await
            .get_mut(tax_id)
            .and_then(|queue| queue.pop_front())
        {
            return response;
        }

        if let Some(location) = self.default.read().await.clone() {
            return Ok(location);
        }

        Err(LookupError::ApiError(format!(
            "no mock response for {}",
            tax_id
        )))
    }
}
