//! Configuration management
//!
//! Configuration is loaded from a YAML file plus `JACOBINE__`-prefixed
//! environment variables. Every process of the pipeline (producer and
//! consumers) constructs one [`Config`] at startup and passes it down
//! explicitly; there is no global configuration state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::stage::StageName;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub rabbitmq: RabbitMqConfig,
    pub mysql: MySqlConfig,
    pub logging: LoggingConfig,
    pub application: ApplicationConfig,
    pub various: VariousConfig,
    pub projects: HashMap<String, ProjectSettings>,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
        }
    }
}

/// MySQL server settings shared by all projects. The per-project database
/// name lives in [`ProjectSettings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// One entry per external binary the stages shell out to.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplicationConfig {
    pub tar: ToolConfig,
    pub git: ToolConfig,
    pub phploc: ToolConfig,
    pub pdepend: ToolConfig,
    pub cvsanaly: ToolConfig,
    pub github_linguist: ToolConfig,
}

/// Path, timeout, and optional file pattern for an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub binary: String,
    /// Kill the child process after this many seconds. 0 means the runner's
    /// long default applies.
    pub timeout_seconds: u64,
    pub file_pattern: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: String::new(),
            timeout_seconds: 0,
            file_pattern: None,
        }
    }
}

impl ToolConfig {
    /// Timeout for the child process, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }
}

/// Timeouts that do not belong to a specific tool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VariousConfig {
    pub requests: RequestTimeouts,
    pub downloads: DownloadTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTimeouts {
    pub timeout_seconds: u64,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadTimeouts {
    pub timeout_seconds: u64,
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self {
            timeout_seconds: 3600,
        }
    }
}

impl RequestTimeouts {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl DownloadTimeouts {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Per-project settings: database, exchange, filesystem roots, and the
/// release feed the producer seeds from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectSettings {
    pub mysql_database: String,
    pub exchange: String,
    pub releases_path: PathBuf,
    pub git_checkout_path: PathBuf,
    /// Base URL of the repository catalog this project's `gitweb` rows were
    /// scraped from.
    pub gitweb: Option<String>,
    pub cvsanaly_config_file: Option<PathBuf>,
    pub feed: FeedConfig,
    /// Analysis stages fanned out after extraction, by analyzer token
    /// (`phploc`, `pdepend`, `github-linguist`).
    pub analyzers: Vec<String>,
}

/// Upstream release feed settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    pub filename_prefix: String,
    pub filename_postfix: String,
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// A configuration value that cannot work at runtime.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl Config {
    /// Load configuration from a YAML file and environment variables.
    ///
    /// With `path == None` the default location `config/jacobine.yml` is
    /// used if present. Environment variables (`JACOBINE__SECTION__KEY`)
    /// override file values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("config/jacobine").required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix("JACOBINE")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. Used by tests and tooling.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a project's settings by name, case-insensitively.
    ///
    /// The file loader lowercases map keys, so `Projects.TYPO3` arrives as
    /// `typo3`; stage consumers still address projects by their display
    /// name.
    pub fn project(&self, name: &str) -> Option<&ProjectSettings> {
        self.projects
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, settings)| settings)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.rabbitmq.host.is_empty() {
            return Err(ValidationError::new("rabbitmq.host must not be empty"));
        }
        if self.mysql.host.is_empty() {
            return Err(ValidationError::new("mysql.host must not be empty"));
        }
        if self.various.requests.timeout_seconds == 0 {
            return Err(ValidationError::new("various.requests.timeout_seconds must be > 0"));
        }
        if self.various.downloads.timeout_seconds == 0 {
            return Err(ValidationError::new("various.downloads.timeout_seconds must be > 0"));
        }

        for (name, project) in &self.projects {
            if project.exchange.is_empty() {
                return Err(ValidationError::new(format!(
                    "projects.{name}.exchange must not be empty"
                )));
            }
            if project.mysql_database.is_empty() {
                return Err(ValidationError::new(format!(
                    "projects.{name}.mysql_database must not be empty"
                )));
            }
            for analyzer in &project.analyzers {
                if StageName::from_analyzer_token(analyzer).is_none() {
                    return Err(ValidationError::new(format!(
                        "projects.{name}.analyzers: unknown analyzer '{analyzer}'"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
rabbitmq:
  host: broker.internal
  port: 5672
  username: pipeline
  password: secret
mysql:
  host: db.internal
  username: jacobine
application:
  tar:
    binary: /usr/bin/tar
    timeout_seconds: 300
  phploc:
    binary: /usr/local/bin/phploc
    timeout_seconds: 900
    file_pattern: "*.php"
projects:
  TYPO3:
    mysql_database: typo3_analysis
    exchange: JacobineAnalysis
    releases_path: /data/typo3/releases
    git_checkout_path: /data/typo3/git
    feed:
      url: https://get.typo3.org/json
      filename_prefix: typo3_
      filename_postfix: .tar.gz
    analyzers: [phploc, pdepend, github-linguist]
"#;

    #[test]
    fn parses_sample_yaml() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.rabbitmq.host, "broker.internal");
        assert_eq!(config.mysql.port, 3306); // default survives partial section
        assert_eq!(config.application.tar.binary, "/usr/bin/tar");
        assert_eq!(
            config.application.phploc.file_pattern.as_deref(),
            Some("*.php")
        );

        let project = config.project("TYPO3").unwrap();
        assert_eq!(project.exchange, "JacobineAnalysis");
        assert_eq!(project.feed.filename_prefix, "typo3_");
        assert_eq!(project.analyzers.len(), 3);
    }

    #[test]
    fn project_lookup_is_case_insensitive() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(config.project("typo3").is_some());
        assert!(config.project("TYPO3").is_some());
        assert!(config.project("flow").is_none());
    }

    #[test]
    fn rejects_unknown_analyzer() {
        let yaml = r#"
projects:
  Demo:
    mysql_database: demo
    exchange: DemoAnalysis
    analyzers: [phploc, sloccount]
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));
        assert!(err.to_string().contains("sloccount"));
    }

    #[test]
    fn rejects_project_without_exchange() {
        let yaml = r#"
projects:
  Demo:
    mysql_database: demo
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("exchange"));
    }

    #[test]
    fn tool_timeout_zero_means_unset() {
        let tool = ToolConfig::default();
        assert!(tool.timeout().is_none());

        let tool = ToolConfig {
            timeout_seconds: 60,
            ..ToolConfig::default()
        };
        assert_eq!(tool.timeout(), Some(Duration::from_secs(60)));
    }
}
