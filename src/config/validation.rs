use crate::config::types::{Config, CrawlerConfig, FormConfig, PolicyConfig};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_policy_config(&config.policy)?;
    validate_forms(&config.forms)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and 256, got {}",
            config.max_concurrency
        )));
    }

    if config.timeout < 100 {
        return Err(ConfigError::Validation(format!(
            "timeout must be >= 100ms, got {}ms",
            config.timeout
        )));
    }

    if config.retry_ceiling < 1 {
        return Err(ConfigError::Validation(format!(
            "retry_ceiling must be >= 1, got {}",
            config.retry_ceiling
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    for seed in &config.seeds {
        validate_http_url(seed, "seed URL")?;
    }

    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

/// Validates the request filtering policy
fn validate_policy_config(config: &PolicyConfig) -> Result<(), ConfigError> {
    if config.domains.is_empty() {
        return Err(ConfigError::Validation(
            "At least one allowed domain is required".to_string(),
        ));
    }

    for domain in &config.domains {
        validate_domain_string(domain)?;
    }

    if config.block_list.iter().any(|entry| entry.is_empty()) {
        return Err(ConfigError::Validation(
            "block-list entries cannot be empty".to_string(),
        ));
    }

    for endpoint in &config.telemetry_endpoints {
        validate_http_url(endpoint, "telemetry endpoint")?;
    }

    Ok(())
}

/// Validates login form entries
fn validate_forms(forms: &[FormConfig]) -> Result<(), ConfigError> {
    for form in forms {
        if form.url_pattern.trim().is_empty() {
            return Err(ConfigError::InvalidPattern(
                "Form url-pattern cannot be empty".to_string(),
            ));
        }

        validate_selector(&form.submit_selector)?;
        for selector in form.fields.keys() {
            validate_selector(selector)?;
        }
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::Validation(format!("Invalid selector '{}': {:?}", selector, e)))
}

fn validate_http_url(value: &str, what: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, value
        )));
    }

    Ok(())
}

/// Validates a domain string
///
/// Accepts hostnames and IP addresses; the latter let the crawler target
/// local test servers.
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}
