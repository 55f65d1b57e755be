use crate::upstream::TrackedMetric;
use crate::{Config, Server};
use anyhow::{anyhow, Context, Result};
use clap::builder::BoolishValueParser;
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

/// Where the configuration comes from: an optional TOML file, overridden by
/// flags and environment variables.
#[derive(Args, Clone, Default)]
pub struct SourceArgs {
    /// Path to configuration file
    #[arg(short, long, env = "SONAR_EXPORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// SonarQube base URL
    #[arg(long, env = "SONAR_URL")]
    pub sonar_url: Option<String>,

    /// SonarQube user token
    #[arg(long, env = "SONAR_TOKEN", hide_env_values = true)]
    pub sonar_token: Option<String>,

    /// Only export projects whose key matches this pattern
    #[arg(long, env = "PROJECT_KEY_REGEX")]
    pub project_key_regex: Option<String>,

    /// Seconds between refresh cycles
    #[arg(long, env = "PULL_INTERVAL_SECONDS")]
    pub pull_interval_seconds: Option<u64>,

    /// Verify the SonarQube TLS certificate
    #[arg(long, env = "VERIFY_TLS", value_parser = BoolishValueParser::new())]
    pub verify_tls: Option<bool>,

    /// Comma-separated metric keys to export
    #[arg(long, env = "SONAR_METRICS", value_delimiter = ',')]
    pub metrics: Option<Vec<TrackedMetric>>,

    /// Listen address as host:port
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Listen host (wins over the host part of --listen-addr)
    #[arg(long, env = "LISTEN_HOST")]
    pub host: Option<String>,

    /// Listen port (wins over the port part of --listen-addr)
    #[arg(long, env = "LISTEN_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (json, pretty, plain)
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl SourceArgs {
    pub fn load(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(url) = &self.sonar_url {
            config.sonar.url = url.clone();
        }
        if let Some(token) = &self.sonar_token {
            config.sonar.token = Some(token.clone());
        }
        if let Some(pattern) = &self.project_key_regex {
            config.exporter.project_key_regex = pattern.clone();
        }
        if let Some(interval) = self.pull_interval_seconds {
            config.exporter.poll_interval_seconds = interval;
        }
        if let Some(verify) = self.verify_tls {
            config.sonar.verify_tls = verify;
        }
        if let Some(metrics) = &self.metrics {
            config.exporter.metrics = metrics.clone();
        }
        if let Some(addr) = &self.listen_addr {
            let (host, port) = split_listen_addr(addr)?;
            config.server.host = host;
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        Ok(())
    }
}

/// Split `host:port`; IPv6 hosts keep their brackets.
fn split_listen_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Listen address must be host:port: {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("Listen address is missing a host: {}", addr));
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("Invalid port in listen address: {}", addr))?;
    Ok((host.to_string(), port))
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Load, check and log the configuration. Fatal problems stop startup here,
/// before anything listens.
pub(crate) fn prepare(source: &SourceArgs) -> Result<Config> {
    let config = source.load()?;

    crate::logging::init_logging(&config.logging.level, &config.logging.format)?;

    let warnings = config.validate().context("Invalid configuration")?;
    for warning in warnings {
        warn!("{}", warning);
    }

    Ok(config)
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let config = prepare(&args.source)?;

    info!("Starting sonar-exporter v{}", crate::VERSION);
    if let Some(path) = &args.source.config {
        info!("Loaded configuration from: {}", path.display());
    }
    info!(
        sonar_url = %config.sonar.base_url(),
        pattern = %config.exporter.project_key_regex,
        interval_secs = config.exporter.poll_interval_seconds,
        metrics = config.exporter.metrics.len(),
        "Exporter configured"
    );

    let server = Server::new(config)?;
    server.serve().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"
[sonar]
url = "https://from-file.example.com"
token = "file-token"

[exporter]
poll_interval_seconds = 120
"#,
        )
        .unwrap();

        let args = SourceArgs {
            config: Some(file.path().to_path_buf()),
            sonar_token: Some("env-token".to_string()),
            verify_tls: Some(false),
            port: Some(9200),
            ..SourceArgs::default()
        };
        let config = args.load().unwrap();

        assert_eq!(config.sonar.url, "https://from-file.example.com");
        assert_eq!(config.sonar.token.as_deref(), Some("env-token"));
        assert!(!config.sonar.verify_tls);
        assert_eq!(config.exporter.poll_interval_seconds, 120);
        assert_eq!(config.server.port, 9200);
    }

    #[test]
    fn test_listen_addr_override() {
        let args = SourceArgs {
            listen_addr: Some("127.0.0.1:9999".to_string()),
            ..SourceArgs::default()
        };
        let config = args.load().unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.listen_addr(), "127.0.0.1:9999");
    }

    #[test]
    fn test_listen_port_wins_over_listen_addr() {
        let args = SourceArgs {
            listen_addr: Some("[::1]:9999".to_string()),
            port: Some(9200),
            ..SourceArgs::default()
        };
        let config = args.load().unwrap();

        assert_eq!(config.server.listen_addr(), "[::1]:9200");
    }

    #[test]
    fn test_malformed_listen_addr_is_rejected() {
        for addr in ["9119", ":9119", "localhost:http"] {
            let args = SourceArgs {
                listen_addr: Some(addr.to_string()),
                ..SourceArgs::default()
            };
            assert!(args.load().is_err(), "{} should be rejected", addr);
        }
    }

    #[derive(clap::Parser)]
    struct Cli {
        #[command(flatten)]
        source: SourceArgs,
    }

    #[test]
    fn test_listen_addr_and_metrics_flags_parse() {
        use clap::Parser;

        let cli = Cli::parse_from([
            "sonar-exporter",
            "--listen-addr",
            "127.0.0.1:9999",
            "--metrics",
            "ncloc,sqale_rating",
        ]);
        let config = cli.source.load().unwrap();

        assert_eq!(config.server.listen_addr(), "127.0.0.1:9999");
        assert_eq!(
            config.exporter.metrics,
            vec![TrackedMetric::Ncloc, TrackedMetric::SqaleRating]
        );
        assert!(Cli::try_parse_from(["sonar-exporter", "--metrics", "alert_status"]).is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let config = SourceArgs::default().load().unwrap();

        assert_eq!(config.sonar.url, "http://localhost:9000");
        assert!(config.sonar.token.is_none());
        assert_eq!(config.server.listen_addr(), "0.0.0.0:9119");
    }
}
