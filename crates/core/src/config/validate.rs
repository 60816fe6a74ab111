use super::{types::Config, ConfigError, MIN_POLL_INTERVAL_SECS};
use crate::selection::TierList;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Overseerr URL is set when the source is enabled
/// - Poll interval is at least one minute
/// - Retry policy is bounded and consistent
/// - Quality tiers and the exclusion pattern compile
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.overseerr.enabled && config.overseerr.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "overseerr.url cannot be empty".to_string(),
        ));
    }

    if config.scheduler.poll_interval_secs < MIN_POLL_INTERVAL_SECS {
        return Err(ConfigError::ValidationError(format!(
            "scheduler.poll_interval_secs must be at least {}",
            MIN_POLL_INTERVAL_SECS
        )));
    }

    let recovery = &config.recovery;
    if recovery.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "recovery.max_attempts must be at least 1".to_string(),
        ));
    }
    if recovery.base_delay_secs > recovery.max_delay_secs {
        return Err(ConfigError::ValidationError(
            "recovery.base_delay_secs cannot exceed recovery.max_delay_secs".to_string(),
        ));
    }
    if recovery.multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "recovery.multiplier must be >= 1.0".to_string(),
        ));
    }
    if recovery.attempt_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "recovery.attempt_timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.selection.max_movie_size_gb < 0.0 || config.selection.max_episode_size_gb < 0.0 {
        return Err(ConfigError::ValidationError(
            "size ceilings cannot be negative".to_string(),
        ));
    }

    TierList::compile(
        &config.selection.tiers,
        config.selection.exclude_pattern.as_deref(),
    )
    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(())
}
