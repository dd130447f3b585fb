use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED", "TRACE",
];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_endpoint(config)?;
    validate_turn(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_endpoint(config: &AppConfig) -> Result<(), ConfigError> {
    let endpoint = &config.endpoint;
    let parsed = url::Url::parse(&endpoint.url)
        .map_err(|err| validation_err(format!("endpoint.url is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "endpoint.url must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    if endpoint.connect_timeout_secs == 0 {
        return Err(validation_err(
            "endpoint.connect_timeout_secs must be greater than 0",
        ));
    }
    if let Some(token) = endpoint.api_token.as_deref() {
        if token.trim().is_empty() {
            return Err(validation_err("endpoint.api_token cannot be blank when set"));
        }
    }
    if endpoint.token_env.trim().is_empty() {
        return Err(validation_err("endpoint.token_env cannot be empty"));
    }
    if let Some(proxy) = endpoint.proxy.as_deref() {
        url::Url::parse(proxy)
            .map_err(|err| validation_err(format!("endpoint.proxy is not a valid URL: {err}")))?;
    }
    Ok(())
}

fn validate_turn(config: &AppConfig) -> Result<(), ConfigError> {
    let turn = &config.turn;
    if turn.timeout_secs == 0 {
        return Err(validation_err("turn.timeout_secs must be greater than 0"));
    }
    if turn.max_tool_rounds == 0 {
        return Err(validation_err("turn.max_tool_rounds must be greater than 0"));
    }
    if turn.cancel_grace_ms > 5_000 {
        return Err(validation_err("turn.cancel_grace_ms must be at most 5000"));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level '{}' is not one of {:?}",
            config.features.log_level, VALID_LOG_LEVELS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        AppConfig::for_endpoint("https://agents.example.com/api/chat/stream")
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut config = valid();
        config.endpoint.url = "ftp://example.com/stream".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = valid();
        config.turn.timeout_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("turn.timeout_secs"));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut config = valid();
        config.features.log_level = "LOUD".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_blank_token() {
        let mut config = valid();
        config.endpoint.api_token = Some("  ".to_string());
        assert!(validate_config(&config).is_err());
    }
}
