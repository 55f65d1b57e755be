use super::Config;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::BTreeSet;

/// Checks a config before the exporter starts.
///
/// Hard problems are returned as errors so the process never starts serving
/// without its credential; everything else comes back as warnings.
pub fn validate_config(config: &Config) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    match config.sonar.token.as_deref() {
        None => bail!("SonarQube token is required (set SONAR_TOKEN or [sonar].token)"),
        Some(token) if token.trim().is_empty() => bail!("SonarQube token is empty"),
        Some(_) => {}
    }

    if !config.sonar.url.starts_with("http://") && !config.sonar.url.starts_with("https://") {
        bail!("SonarQube URL must start with http:// or https://: {}", config.sonar.url);
    }

    Regex::new(&config.exporter.project_key_regex).with_context(|| {
        format!("Invalid project key regex: {}", config.exporter.project_key_regex)
    })?;

    if config.exporter.poll_interval_seconds == 0 {
        bail!("Poll interval must be at least 1 second");
    }

    if config.sonar.page_size == 0 {
        bail!("Page size must be greater than 0");
    }

    if config.sonar.max_pages == 0 {
        bail!("max_pages must be greater than 0");
    }

    if config.sonar.request_timeout_seconds == 0 {
        bail!("Request timeout must be greater than 0");
    }

    if config.exporter.metrics.is_empty() {
        bail!("At least one tracked metric is required");
    }

    let mut tracked = BTreeSet::new();
    for metric in &config.exporter.metrics {
        if !tracked.insert(metric) {
            bail!("Tracked metric listed more than once: {}", metric);
        }
    }

    if config.exporter.fetch_concurrency == 0 {
        warnings.push("[!] fetch_concurrency is 0. Falling back to sequential fetches.".to_string());
    }

    if !config.sonar.verify_tls {
        warnings.push(
            "[!] TLS certificate verification is disabled for the SonarQube connection".to_string(),
        );
    }

    if config.sonar.page_size > 500 {
        warnings.push(format!(
            "[!] Page size {} exceeds the SonarQube maximum of 500 and may be rejected",
            config.sonar.page_size
        ));
    }

    if config.exporter.poll_interval_seconds < 10 {
        warnings.push(format!(
            "[!] Poll interval of {}s is very short. Consider 60s or more to spare the SonarQube server",
            config.exporter.poll_interval_seconds
        ));
    }

    if config.sonar.url.starts_with("http://") && !is_local(&config.sonar.url) {
        warnings.push(format!(
            "[!] SonarQube URL {} uses plain HTTP; the token is sent unencrypted",
            config.sonar.url
        ));
    }

    if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
        warnings.push(format!(
            "[X] Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            config.logging.level
        ));
    }

    if !["json", "pretty", "plain"].contains(&config.logging.format.as_str()) {
        warnings.push(format!(
            "[X] Invalid log format: {}. Must be 'json', 'pretty' or 'plain'",
            config.logging.format
        ));
    }

    Ok(warnings)
}

fn is_local(url: &str) -> bool {
    let rest = url.trim_start_matches("http://");
    rest.starts_with("localhost") || rest.starts_with("127.0.0.1") || rest.starts_with("[::1]")
}
