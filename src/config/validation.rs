use super::{ClientConfig, ConfigError};

const VALID_LOG_LEVELS: [&str; 6] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_credentials(config)?;
    validate_endpoint(config)?;
    validate_http_settings(config)?;
    validate_proxy_url(config.proxy.as_deref())?;
    validate_log_level(config)?;
    if config.batch.poll_interval_secs == 0 {
        return Err(validation_err("batch.poll_interval_secs must be greater than 0"));
    }
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_credentials(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.api_key.trim().is_empty() {
        return Err(validation_err(format!(
            "api_key cannot be empty (set it in the file or via {})",
            super::API_KEY_ENV
        )));
    }
    if config.api_version.trim().is_empty() {
        return Err(validation_err("api_version cannot be empty"));
    }
    Ok(())
}

fn validate_endpoint(config: &ClientConfig) -> Result<(), ConfigError> {
    if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
        return Err(validation_err("base_url must start with http:// or https://"));
    }
    url::Url::parse(&config.base_url)
        .map_err(|err| validation_err(format!("base_url is not a valid URL: {err}")))?;
    Ok(())
}

fn validate_http_settings(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.timeout_secs == 0 {
        return Err(validation_err("timeout_secs must be greater than 0"));
    }
    if config.connect_timeout_secs == 0 {
        return Err(validation_err("connect_timeout_secs must be greater than 0"));
    }
    if config.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "pool_max_idle_per_host must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_proxy_url(proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err("proxy cannot be empty when set"));
    }
    let parsed = url::Url::parse(proxy)
        .map_err(|err| validation_err(format!("proxy is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err("proxy must use http:// or https://"));
    }
    Ok(())
}

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    if !VALID_LOG_LEVELS.contains(&config.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}"
        )));
    }
    Ok(())
}
