use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

pub fn parse_config(path: &PathBuf) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Render a config as TOML. The token is never written out.
pub fn render_config(config: &Config) -> Result<String> {
    let mut config = config.clone();
    config.sonar.token = None;

    toml::to_string_pretty(&config).context("Failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::TrackedMetric;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_minimal_config() {
        let config_content = r#"
[sonar]
url = "https://sonar.example.com/"
token = "squ_abc"

[exporter]
project_key_regex = "^team-"
poll_interval_seconds = 60
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        let path = PathBuf::from(temp_file.path());

        let config = parse_config(&path).unwrap();
        assert_eq!(config.sonar.base_url(), "https://sonar.example.com");
        assert_eq!(config.sonar.token.as_deref(), Some("squ_abc"));
        assert!(config.sonar.verify_tls);
        assert_eq!(config.exporter.project_key_regex, "^team-");
        assert_eq!(config.exporter.poll_interval_seconds, 60);
        assert_eq!(config.exporter.metrics.len(), TrackedMetric::ALL.len());
        assert_eq!(config.server.port, 9119);
    }

    #[test]
    fn test_parse_metric_subset() {
        let config_content = r#"
[exporter]
metrics = ["ncloc", "sqale_rating"]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        let path = PathBuf::from(temp_file.path());

        let config = parse_config(&path).unwrap();
        assert_eq!(
            config.exporter.metrics,
            vec![TrackedMetric::Ncloc, TrackedMetric::SqaleRating]
        );
        assert!(config.sonar.token.is_none());
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let config_content = r#"
[exporter]
metrics = ["lines_of_poetry"]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        let path = PathBuf::from(temp_file.path());

        assert!(parse_config(&path).is_err());
    }

    #[test]
    fn test_render_omits_token() {
        let mut config = Config::default();
        config.sonar.token = Some("squ_secret".to_string());

        let rendered = render_config(&config).unwrap();
        assert!(!rendered.contains("squ_secret"));
        assert!(rendered.contains("[exporter]"));
        assert!(!format!("{:?}", config).contains("squ_secret"));
    }
}
