use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub actions: ActionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Storage layout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding one JSON document per batch
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding downloaded and merged artifacts
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/batches")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data/artifacts")
}

/// Entity registry (tax id -> location) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Registry base URL (e.g., "https://registry.example.com")
    pub base_url: String,
    /// Request timeout in seconds (default: 10)
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u32,
    /// Minimum interval between registry calls, shared across the batch (default: 3000)
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Cool-down before the single retry after a rate-limit response (default: 60)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_registry_timeout() -> u32 {
    10
}

fn default_min_interval_ms() -> u64 {
    3000
}

fn default_cooldown_secs() -> u64 {
    60
}

/// Action API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionsConfig {
    /// Action API base URL (e.g., "https://actions.example.com")
    pub base_url: String,
    /// Bearer token for the action API
    pub api_key: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_actions_timeout")]
    pub timeout_secs: u32,
    /// Transport-level retries for timeouts and connection failures (default: 2)
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    /// Fixed backoff between transport retries (default: 1000)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_actions_timeout() -> u32 {
    30
}

fn default_transport_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Groups processed concurrently (default: 4)
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,
    /// Fixed wait before collecting a generated document (default: 20)
    #[serde(default = "default_collect_wait_secs")]
    pub collect_wait_secs: u64,
    /// Upload size limit in bytes (default: 25 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Run entry-status groups through the whole pipeline in one pass (default: true)
    #[serde(default = "default_multi_hop")]
    pub multi_hop: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_groups: default_max_concurrent_groups(),
            collect_wait_secs: default_collect_wait_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            multi_hop: default_multi_hop(),
        }
    }
}

fn default_max_concurrent_groups() -> usize {
    4
}

fn default_collect_wait_secs() -> u64 {
    20
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_multi_hop() -> bool {
    true
}

/// Audit trail configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_db_path")]
    pub db_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            db_path: default_audit_db_path(),
        }
    }
}

fn default_audit_db_path() -> PathBuf {
    PathBuf::from("billrun-audit.db")
}

/// Sanitized config for logs (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub registry: RegistryConfig,
    pub actions: SanitizedActionsConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub audit: AuditConfig,
}

/// Sanitized action API config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedActionsConfig {
    pub base_url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
    pub transport_retries: u32,
    pub retry_backoff_ms: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            registry: config.registry.clone(),
            actions: SanitizedActionsConfig {
                base_url: config.actions.base_url.clone(),
                api_key_configured: !config.actions.api_key.is_empty(),
                timeout_secs: config.actions.timeout_secs,
                transport_retries: config.actions.transport_retries,
                retry_backoff_ms: config.actions.retry_backoff_ms,
            },
            storage: config.storage.clone(),
            pipeline: config.pipeline.clone(),
            audit: config.audit.clone(),
        }
    }
}
