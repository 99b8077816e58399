// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::supervisor::WorkerSpec;
use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_URL: &str = "http://localhost:31199/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;
const DEFAULT_CONFIG_PATH: &str = "config/procbridge.yaml";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_php_binary() -> String {
    "php".to_string()
}

fn default_console_script() -> String {
    "think".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_php_binary")]
    pub php_binary: String,
    /// Framework console entry point, relative to the working directory of
    /// the host unless absolute.
    #[serde(default = "default_console_script")]
    pub console_script: String,
    #[serde(default)]
    pub queue_worker: QueueWorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            secret: String::new(),
            timeout_secs: default_timeout_secs(),
            php_binary: default_php_binary(),
            console_script: default_console_script(),
            queue_worker: QueueWorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueWorkerConfig {
    #[serde(default)]
    pub log_worker_events: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_true")]
    pub auto_stop: bool,
    #[serde(default)]
    pub auto_start_workers: Vec<WorkerSpec>,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            log_worker_events: false,
            auto_start: false,
            auto_stop: true,
            auto_start_workers: Vec::new(),
        }
    }
}

pub fn config_path() -> PathBuf {
    std::env::var("PROCBRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the YAML config at `path`, then apply environment overrides.
/// A missing file is not an error: defaults are used.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        parse_config(path)?
    } else {
        warn!(
            "config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn parse_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    // An empty file deserializes to unit, not to a mapping.
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(url) = std::env::var("PROCBRIDGE_API_URL") {
        config.api_url = url;
    }
    if let Ok(secret) = std::env::var("PROCBRIDGE_SECRET") {
        config.secret = secret;
    }
    if let Ok(raw) = std::env::var("PROCBRIDGE_TIMEOUT_SECS") {
        config.timeout_secs = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid PROCBRIDGE_TIMEOUT_SECS: {raw}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use std::fs;

    const OVERRIDES: [(&str, Option<&str>); 3] = [
        ("PROCBRIDGE_API_URL", None),
        ("PROCBRIDGE_SECRET", None),
        ("PROCBRIDGE_TIMEOUT_SECS", None),
    ];

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procbridge.yaml");
        let yaml = r#"
api_url: http://127.0.0.1:4000/api
secret: hunter2
timeout_secs: 30
php_binary: /usr/local/bin/php
console_script: /srv/app/think
queue_worker:
  log_worker_events: true
  auto_start: true
  auto_stop: false
  auto_start_workers:
    - connection: redis
      queue: emails
      tries: 5
    - queue: reports
"#;
        fs::write(&path, yaml).unwrap();

        let cfg = temp_env::with_vars(OVERRIDES, || load_config(&path).unwrap());
        assert_eq!(cfg.api_url, "http://127.0.0.1:4000/api");
        assert_eq!(cfg.secret, "hunter2");
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.php_binary, "/usr/local/bin/php");
        assert_eq!(cfg.console_script, "/srv/app/think");

        let qw = &cfg.queue_worker;
        assert!(qw.log_worker_events);
        assert!(qw.auto_start);
        assert!(!qw.auto_stop);
        assert_eq!(qw.auto_start_workers.len(), 2);

        let first = &qw.auto_start_workers[0];
        assert_eq!(first.alias(), "queue-worker-redis-emails");
        assert_eq!(first.tries, 5);
        assert_eq!(first.timeout_secs, 60);
        assert!(first.persistent);

        let second = &qw.auto_start_workers[1];
        assert_eq!(second.connection, "default");
        assert_eq!(second.alias(), "queue-worker-default-reports");
    }

    #[test]
    fn test_parse_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procbridge.yaml");
        fs::write(&path, "secret: abc\n").unwrap();

        let cfg = temp_env::with_vars(OVERRIDES, || load_config(&path).unwrap());
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert_eq!(cfg.secret, "abc");
        assert_eq!(cfg.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(cfg.php_binary, "php");
        assert!(!cfg.queue_worker.auto_start);
        assert!(cfg.queue_worker.auto_stop);
        assert!(cfg.queue_worker.auto_start_workers.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procbridge.yaml");
        fs::write(&path, "\n").unwrap();

        let cfg = temp_env::with_vars(OVERRIDES, || load_config(&path).unwrap());
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = temp_env::with_vars(OVERRIDES, || {
            load_config(Path::new("/nonexistent/procbridge.yaml")).unwrap()
        });
        assert_eq!(cfg.api_url, DEFAULT_API_URL);
        assert!(cfg.secret.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procbridge.yaml");
        fs::write(&path, "not: valid: yaml: [").unwrap();

        let result = temp_env::with_vars(OVERRIDES, || load_config(&path));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procbridge.yaml");
        fs::write(&path, "api_url: http://file/api\nsecret: from-file\n").unwrap();

        let cfg = temp_env::with_vars(
            [
                ("PROCBRIDGE_API_URL", Some("http://env/api")),
                ("PROCBRIDGE_SECRET", Some("from-env")),
                ("PROCBRIDGE_TIMEOUT_SECS", Some("15")),
            ],
            || load_config(&path).unwrap(),
        );
        assert_eq!(cfg.api_url, "http://env/api");
        assert_eq!(cfg.secret, "from-env");
        assert_eq!(cfg.timeout_secs, 15);
    }

    #[test]
    fn test_invalid_timeout_override() {
        let result = temp_env::with_vars(
            [
                ("PROCBRIDGE_API_URL", None),
                ("PROCBRIDGE_SECRET", None),
                ("PROCBRIDGE_TIMEOUT_SECS", Some("soon")),
            ],
            || load_config(Path::new("/nonexistent/procbridge.yaml")),
        );
        assert!(result.is_err());
    }
}
