//! Configuration management for routescout.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisConfig;
use crate::connection::ActiveRouteStore;
use crate::error::{Error, Result};
use crate::probe::ProbeConfig;
use crate::tunnel::TunnelConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Route analysis configuration.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Probe configuration.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Tunnel configuration.
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Runtime state configuration.
    #[serde(default)]
    pub state: StateConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {e}")))?;
        }
        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("analysis.interval", self.analysis.interval),
            ("analysis.cache_ttl", self.analysis.cache_ttl),
            ("analysis.probe_timeout", self.analysis.probe_timeout),
            ("probe.ping_timeout", self.probe.ping_timeout),
            ("probe.throughput_window", self.probe.throughput_window),
            ("probe.command_timeout", self.probe.command_timeout),
        ];
        for (name, value) in positive {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
            }
        }

        if !(1..=100).contains(&self.probe.ping_count) {
            return Err(Error::InvalidConfig(
                "probe.ping_count must be between 1 and 100".into(),
            ));
        }

        self.tunnel.validate()?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::InvalidConfig(format!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "routescout", "routescout").map_or_else(
            || PathBuf::from("routescout.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            analysis: AnalysisConfig {
                interval: Duration::from_secs(10),
                ..Default::default()
            },
            tunnel: TunnelConfig {
                private_key_file: Some(PathBuf::from("/etc/routescout/private.key")),
                address: vec!["10.66.0.2/32".into()],
                peer_public_key: Some("REPLACE_WITH_PEER_PUBLIC_KEY".into()),
                peer_endpoint: Some(SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
                    51820,
                )),
                dns: vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))],
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Runtime state configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Where the active route is remembered across restarts.
    pub state_file: Option<PathBuf>,
}

impl StateConfig {
    /// Effective state file path.
    pub fn path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(ActiveRouteStore::default_path)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            color: default_color(),
        }
    }
}

/// Initialize logging.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, ansi) = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("Failed to open log file: {e}")))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), config.color),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.analysis.interval, Duration::from_secs(5));
        assert_eq!(config.analysis.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.analysis.rediscover_every, 12);
        assert_eq!(config.probe.ping_count, 4);
        assert_eq!(config.tunnel.interface_name, "rs0");
        assert_eq!(config.logging.format, "text");
        config.validate().unwrap();
    }

    #[test]
    fn test_humantime_durations() {
        let config: Config = toml::from_str(
            r#"
            [analysis]
            interval = "2s 500ms"
            cache_ttl = "1m"

            [tunnel]
            provision_timeout = "45s"
            "#,
        )
        .unwrap();
        assert_eq!(config.analysis.interval, Duration::from_millis(2500));
        assert_eq!(config.analysis.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.tunnel.provision_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.analysis.interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::default();
        config.probe.ping_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let example = Config::example();
        example.validate().unwrap();
        example.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.tunnel.is_complete());
        assert_eq!(loaded.tunnel.peer_endpoint, example.tunnel.peer_endpoint);
        assert_eq!(loaded.analysis.interval, Duration::from_secs(10));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path().join("absent.toml")),
            Err(Error::Config(_))
        ));
        let explicit = dir.path().join("absent.toml");
        assert!(Config::load_or_default(Some(&explicit)).is_err());
    }
}
