//! HTTP registry backend implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::batch::LocationInfo;
use crate::config::RegistryConfig;

use super::types::{LookupClient, LookupError};

/// Registry backend that resolves tax ids over HTTP.
pub struct HttpLookupClient {
    client: Client,
    config: RegistryConfig,
}

impl HttpLookupClient {
    /// Create a new client with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Build the registry URL for a tax id.
    fn build_url(&self, tax_id: &str) -> String {
        format!(
            "{}/v1/entities/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(tax_id)
        )
    }
}

#[async_trait]
impl LookupClient for HttpLookupClient {
    fn name(&self) -> &str {
        "registry"
    }

    async fn fetch(&self, tax_id: &str) -> Result<LocationInfo, LookupError> {
        let url = self.build_url(tax_id);
        debug!(tax_id = tax_id, "Querying registry");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                LookupError::Timeout
            } else if e.is_connect() {
                LookupError::ConnectionFailed(e.to_string())
            } else {
                LookupError::ApiError(e.to_string())
            }
        })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(LookupError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LookupError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LookupError::ApiError(format!("Failed to parse response: {}", e)))?;

        let city = payload
            .get("city")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let state = payload
            .get("state")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if city.is_empty() || state.is_empty() {
            return Err(LookupError::ApiError(
                "response missing city or state".to_string(),
            ));
        }

        Ok(LocationInfo::new(city, state).with_raw(payload))
    }
}
