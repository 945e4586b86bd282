//! Registry lookup trait and types.

use async_trait::async_trait;
use thiserror::Error;

use crate::batch::LocationInfo;

/// Error type for registry lookups.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("Registry connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Registry API error: {0}")]
    ApiError(String),

    #[error("Registry rate limited")]
    RateLimited,

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid tax id: {0}")]
    InvalidId(String),
}

/// Outcome of a cache resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub location: LocationInfo,
    /// True when no external call was issued for this resolution.
    pub cache_hit: bool,
}

/// Trait for tax-id registry backends.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Backend name for logging/audit.
    fn name(&self) -> &str;

    /// Fetch location metadata for one tax id.
    async fn fetch(&self, tax_id: &str) -> Result<LocationInfo, LookupError>;
}
