use super::{AppConfig, ConfigError};

const MIN_PENDING_BUFFER_BYTES: usize = 1024;

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_log_level(config)?;
    validate_translation(config)?;
    validate_sessions(config)?;
    validate_signatures(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_translation(config: &AppConfig) -> Result<(), ConfigError> {
    let translation = &config.translation;
    if translation.endpoint.trim().is_empty() {
        return Err(validation_err("translation.endpoint cannot be empty"));
    }
    if translation.tool_description_max_chars == 0 {
        return Err(validation_err(
            "translation.tool_description_max_chars must be greater than 0",
        ));
    }
    if translation.max_pending_buffer_bytes < MIN_PENDING_BUFFER_BYTES {
        return Err(validation_err(format!(
            "translation.max_pending_buffer_bytes must be at least {MIN_PENDING_BUFFER_BYTES}"
        )));
    }
    if !matches!(
        translation.reasoning_summary.as_str(),
        "auto" | "concise" | "detailed" | "none"
    ) {
        return Err(validation_err(
            "translation.reasoning_summary must be one of auto, concise, detailed, none",
        ));
    }
    Ok(())
}

fn validate_sessions(config: &AppConfig) -> Result<(), ConfigError> {
    if config.sessions.ttl_secs == 0 {
        return Err(validation_err("sessions.ttl_secs must be greater than 0"));
    }
    Ok(())
}

fn validate_signatures(config: &AppConfig) -> Result<(), ConfigError> {
    let signatures = &config.signatures;
    if signatures.ttl_secs == 0 {
        return Err(validation_err("signatures.ttl_secs must be greater than 0"));
    }
    if signatures.min_length == 0 {
        return Err(validation_err(
            "signatures.min_length must be greater than 0",
        ));
    }
    if signatures.tool_cache_limit == 0 || signatures.family_cache_limit == 0 {
        return Err(validation_err(
            "signatures cache limits must be greater than 0",
        ));
    }
    Ok(())
}
