use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid scheduler tick_interval_ms: {0}. Must be at least 1")]
    InvalidTickInterval(u64),

    #[error("Duplicate job name: {0}")]
    DuplicateJobName(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Project-local config directory.
pub const CONFIG_DIR: &str = ".compensator";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .compensator/config.yaml (project config, created by init)
    /// 3. .compensator/local.yaml (local overrides, optional)
    /// 4. Environment variables (COMPENSATOR_* prefix, `__` for nesting)
    ///
    /// Job configuration is not validated here: a broken job only disables
    /// itself, tick by tick.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(format!("{CONFIG_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{CONFIG_DIR}/local.yaml")))
            .merge(Env::prefixed("COMPENSATOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("COMPENSATOR_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate the process-wide sections after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        if config.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval(config.scheduler.tick_interval_ms));
        }
        if config.jobs.len() > config.scheduler.max_jobs {
            return Err(ConfigError::ValidationFailed(format!(
                "{} jobs configured but scheduler.max_jobs is {}",
                config.jobs.len(),
                config.scheduler.max_jobs
            )));
        }

        let mut seen = HashSet::new();
        for job in &config.jobs {
            if job.name.is_empty() {
                return Err(ConfigError::ValidationFailed("job name cannot be empty".to_string()));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigError::DuplicateJobName(job.name.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{JobAction, LockBackend, ScheduleConfig, WindowField};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const JOBS_YAML: &str = r"
database:
  path: /var/lib/compensator/ledger.db
  max_connections: 5
logging:
  level: debug
  format: pretty
lock_store:
  backend: memory
jobs:
  - name: topic_compensation
    enabled: true
    schedule:
      type: interval
      every_secs: 30
    scan:
      kind: message
      window_secs: 1200
    action:
      type: compensate
      handler_url: http://localhost:8080/compensate
  - name: sandbox_reconcile
    enabled: true
    schedule:
      type: cron
      expression: '0 0 * * * *'
    global_lock_ttl_secs: 600
    scan:
      kind: sandbox_task
      statuses: [running]
      window_secs: 10800
      window_field: created_at
    action:
      type: reconcile
      authority_url: http://sandbox.internal
      max_active_polls: 24
";

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".compensator/compensator.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.lock_store.backend, LockBackend::Sqlite);
        assert!(config.jobs.is_empty());
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let config: Config = serde_yaml::from_str(JOBS_YAML).expect("YAML should parse");

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.lock_store.backend, LockBackend::Memory);
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.enabled_jobs().count(), 2);

        let reconcile = config.job("sandbox_reconcile").unwrap();
        assert_eq!(reconcile.scan.window_field, WindowField::CreatedAt);
        assert!(matches!(reconcile.schedule, ScheduleConfig::Cron { .. }));
        assert!(matches!(reconcile.action, JobAction::Reconcile(ref r) if r.max_active_polls == Some(24)));

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
        for job in &config.jobs {
            job.validate().expect("jobs should be valid");
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "verbose"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }

    #[test]
    fn test_validate_zero_tick_interval() {
        let mut config = Config::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTickInterval(0))
        ));
    }

    #[test]
    fn test_validate_duplicate_job_names() {
        let mut config: Config = serde_yaml::from_str(JOBS_YAML).unwrap();
        config.jobs[1].name = "topic_compensation".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::DuplicateJobName(name) => assert_eq!(name, "topic_compensation"),
            other => panic!("Expected DuplicateJobName error, got {other:?}"),
        }
    }

    #[test]
    fn test_broken_job_does_not_fail_loading() {
        let mut config: Config = serde_yaml::from_str(JOBS_YAML).unwrap();
        config.jobs[0].scan.window_secs = 0;
        assert!(ConfigLoader::validate(&config).is_ok());
        assert!(config.jobs[0].validate().is_err());
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(base_file, "logging:\n  level: info\n  format: json\ndatabase:\n  max_connections: 4").unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "logging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.logging.level, "debug", "Override should win for nested fields");
        assert_eq!(config.logging.format, "json", "Base value should persist when not overridden");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.scheduler.tick_interval_ms, 1000, "Defaults fill the rest");
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: info").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("COMPENSATOR_LOGGING__LEVEL", Some("warn")),
                ("COMPENSATOR_SCHEDULER__TICK_INTERVAL_MS", Some("250")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.logging.level, "warn");
                assert_eq!(config.scheduler.tick_interval_ms, 250);
            },
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(ConfigLoader::load_from_file("/nonexistent/compensator.yaml").is_err());
    }
}
