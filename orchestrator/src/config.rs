//! Configuration loading and default template generation.
//!
//! This module provides:
//!
//! - [`Config`]: the service list plus [`ShutdownConfig`] timings.
//! - [`load_config`]: reads and parses a TOML configuration file.
//! - [`generate_default_config`]: produces a commented TOML template.
//!
//! # Configuration File Format
//!
//! ```toml
//! [shutdown]
//! timeout = "30s"
//! wait_time = "10s"
//! callback_timeout = "3s"
//!
//! [[services]]
//! name = "public"
//! addr = "0.0.0.0:8080"
//! ```

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::orchestrator::ShutdownConfig;

/// Process configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shutdown timings; missing keys keep their defaults.
    pub shutdown: ShutdownConfig,
    /// Services to host, in registration order.
    pub services: Vec<ServiceConfig>,
}

/// One hosted HTTP service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique service name.
    pub name: String,
    /// Address to bind.
    pub addr: SocketAddr,
}

impl Config {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid TOML or does
    /// not match the expected shape.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::config_with("failed to parse TOML config", e))
    }
}

/// Load configuration from a TOML file at the given path.
///
/// # Errors
///
/// Returns an error if the file cannot be resolved, read, or parsed.
pub fn load_config(path: &Path) -> Result<Config, Error> {
    let config_path = path.canonicalize().map_err(|e| {
        Error::config_with(format!("failed to resolve config path '{}'", path.display()), e)
    })?;
    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        Error::config_with(
            format!("failed to read config file '{}'", config_path.display()),
            e,
        )
    })?;
    Config::from_toml(&content)
}

/// Generate a default TOML configuration template.
#[must_use]
pub fn generate_default_config() -> String {
    String::from(
        r#"# Shutdown orchestrator configuration

# ── Shutdown timings ────────────────────────────────────────────────
# Durations use humantime syntax: "500ms", "10s", "1m 30s".

[shutdown]
# Hard ceiling for the whole shutdown sequence. When it elapses the
# process exits with status 1, whatever stage is still running.
timeout = "30s"
# Grace period for in-flight requests once new requests get 503.
wait_time = "10s"
# Deadline handed to each shutdown callback.
callback_timeout = "3s"

# ── Services ────────────────────────────────────────────────────────
# Each [[services]] entry is an HTTP listener. Names must be unique.

[[services]]
name = "public"
addr = "0.0.0.0:8080"

[[services]]
name = "admin"
addr = "127.0.0.1:8081"
"#,
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn default_template_parses() {
        let config = Config::from_toml(&generate_default_config()).unwrap();
        assert_eq!(config.shutdown, ShutdownConfig::default());
        assert_eq!(
            config.services,
            [
                ServiceConfig {
                    name: "public".to_owned(),
                    addr: "0.0.0.0:8080".parse().unwrap(),
                },
                ServiceConfig {
                    name: "admin".to_owned(),
                    addr: "127.0.0.1:8081".parse().unwrap(),
                },
            ]
        );
    }

    #[test]
    fn missing_timings_keep_defaults() {
        let config = Config::from_toml(
            r#"
            [shutdown]
            wait_time = "250ms"
            "#,
        )
        .unwrap();
        assert_eq!(config.shutdown.wait_time, Duration::from_millis(250));
        assert_eq!(config.shutdown.timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown.callback_timeout, Duration::from_secs(3));
        assert!(config.services.is_empty());
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let err = Config::from_toml(
            r#"
            [shutdown]
            timeout = "soon"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("does/not/exist.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to resolve config path"));
    }
}
