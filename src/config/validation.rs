use crate::config::types::{
    Config, DetailConfig, LimitsConfig, ListingConfig, OutputConfig, PacingConfig, RetryConfig,
    SessionConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_listing_config(&config.listing)?;
    validate_detail_config(&config.detail)?;
    validate_limits_config(&config.limits)?;
    validate_pacing_config(&config.pacing)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    validate_session_config(&config.session)?;
    Ok(())
}

/// Validates listing configuration
fn validate_listing_config(config: &ListingConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid listing url '{}': {}", config.url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Listing url '{}' must use http or https",
            config.url
        )));
    }

    if config.page_param.is_empty() {
        return Err(ConfigError::Validation(
            "page-param cannot be empty".to_string(),
        ));
    }

    if config.start_page < 1 {
        return Err(ConfigError::Validation(format!(
            "start-page must be >= 1, got {}",
            config.start_page
        )));
    }

    if config.items_per_page < 1 {
        return Err(ConfigError::Validation(format!(
            "items-per-page must be >= 1, got {}",
            config.items_per_page
        )));
    }

    if config.page_batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "page-batch-size must be >= 1, got {}",
            config.page_batch_size
        )));
    }

    validate_timeout("listing timeout-ms", config.timeout_ms)?;

    validate_selector("listing ready-selector", &config.ready_selector)?;
    validate_selector("listing link-selector", &config.link_selector)?;
    if let Some(selector) = &config.no_results_selector {
        validate_selector("listing no-results-selector", selector)?;
    }

    if config.exclude_patterns.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::Validation(
            "exclude-patterns cannot contain empty strings".to_string(),
        ));
    }

    Ok(())
}

/// Validates detail configuration
fn validate_detail_config(config: &DetailConfig) -> Result<(), ConfigError> {
    validate_timeout("detail timeout-ms", config.timeout_ms)?;

    if let Some(selector) = &config.ready_selector {
        validate_selector("detail ready-selector", selector)?;
    }

    if config.fields.is_empty() {
        return Err(ConfigError::Validation(
            "At least one [[detail.fields]] entry is required".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for field in &config.fields {
        if field.name.is_empty() {
            return Err(ConfigError::Validation(
                "Field name cannot be empty".to_string(),
            ));
        }

        if field.name == "url" {
            return Err(ConfigError::Validation(
                "Field name 'url' is reserved for the detail URL column".to_string(),
            ));
        }

        if !names.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate field name '{}'",
                field.name
            )));
        }

        validate_selector(&format!("field '{}'", field.name), &field.selector)?;

        if field.attribute.as_deref() == Some("") {
            return Err(ConfigError::Validation(format!(
                "Field '{}' has an empty attribute name",
                field.name
            )));
        }
    }

    Ok(())
}

/// Validates limits configuration
fn validate_limits_config(config: &LimitsConfig) -> Result<(), ConfigError> {
    if config.max_items < 1 {
        return Err(ConfigError::Validation(format!(
            "max-items must be >= 1, got {}",
            config.max_items
        )));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint-interval must be >= 1, got {}",
            config.checkpoint_interval
        )));
    }

    Ok(())
}

/// Validates pacing configuration
fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    if config.batch_delay_min_ms > config.batch_delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "batch-delay-min-ms ({}) must not exceed batch-delay-max-ms ({})",
            config.batch_delay_min_ms, config.batch_delay_max_ms
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 || config.max_retries > 20 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be between 1 and 20, got {}",
            config.max_retries
        )));
    }

    if !config.backoff_multiplier.is_finite() || config.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff-multiplier must be >= 1.0, got {}",
            config.backoff_multiplier
        )));
    }

    if config.backoff_base_ms > config.backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms ({}) must not exceed backoff-max-ms ({})",
            config.backoff_base_ms, config.backoff_max_ms
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.state_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "state-dir cannot be empty".to_string(),
        ));
    }

    if config.batch_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "batch-dir cannot be empty".to_string(),
        ));
    }

    if config.csv_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "csv-path cannot be empty".to_string(),
        ));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be >= 1, got {}",
            config.batch_size
        )));
    }

    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    for name in &config.required_env {
        validate_env_name(name)?;
    }

    if let Some(name) = &config.auth_token_env {
        validate_env_name(name)?;
    }

    validate_env_name(&config.headless_env)?;

    if config.user_agent.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_timeout(name: &str, timeout_ms: u64) -> Result<(), ConfigError> {
    if timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "{} must be >= 100ms, got {}ms",
            name, timeout_ms
        )));
    }
    Ok(())
}

/// Checks that a CSS selector parses
fn validate_selector(name: &str, selector: &str) -> Result<(), ConfigError> {
    if selector.trim().is_empty() {
        return Err(ConfigError::InvalidSelector(format!("{} is empty", name)));
    }

    Selector::parse(selector).map_err(|e| {
        ConfigError::InvalidSelector(format!("{} '{}': {:?}", name, selector, e))
    })?;

    Ok(())
}

/// Environment variable names: letters, digits and underscores, not starting with a digit
fn validate_env_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(ConfigError::Validation(format!(
            "Invalid environment variable name: '{}'",
            name
        )));
    }

    Ok(())
}
