use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Registry and action API base URLs are set
/// - Action API key is set (required sections enforced by serde)
/// - Pipeline limits are usable
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.registry.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "registry.base_url cannot be empty".to_string(),
        ));
    }

    if config.actions.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "actions.base_url cannot be empty".to_string(),
        ));
    }
    if config.actions.api_key.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "actions.api_key cannot be empty".to_string(),
        ));
    }

    if config.pipeline.max_concurrent_groups == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_concurrent_groups cannot be 0".to_string(),
        ));
    }
    if config.pipeline.max_upload_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_upload_bytes cannot be 0".to_string(),
        ));
    }

    Ok(())
}
