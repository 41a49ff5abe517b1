//! Controller configuration.
//!
//! A YAML file layered over built-in defaults: every field defaults
//! individually, so a partial file overrides only what it names.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kudo_api::{HumanDuration, ValueWithKind};

use crate::audit::default_sinks;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audit sink wiring.
    pub audit: AuditConfig,
    /// Reconciler and work-queue tuning.
    pub controller: ControllerConfig,
    /// Webhook listener settings, consumed by the external listener.
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            audit: AuditConfig::default(),
            controller: ControllerConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// Audit sink list; entries are kind-tagged values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Configured sinks, routed by their kind tag.
    pub sinks: Vec<ValueWithKind>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            sinks: default_sinks(),
        }
    }
}

/// Reconciler and work-queue tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Upper bound between idle re-wakeups of a healthy accepted
    /// escalation.
    pub resync_interval: HumanDuration,
    /// Delay between partial-progress retries.
    pub retry_interval: HumanDuration,
    /// External cache refresh period.
    pub informer_resync_interval: HumanDuration,
    /// Work-queue worker count.
    pub threadiness: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            resync_interval: HumanDuration::from_secs(30),
            retry_interval: HumanDuration::from_secs(10),
            informer_resync_interval: HumanDuration::from_secs(3600),
            threadiness: 10,
        }
    }
}

/// HTTPS listener settings for the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookConfig {
    /// Listen address.
    pub addr: String,
    /// Path to the TLS certificate.
    pub cert_path: String,
    /// Path to the TLS private key.
    pub key_path: String,
    /// Read timeout applied by the listener.
    pub read_timeout: HumanDuration,
    /// Write timeout applied by the listener.
    pub write_timeout: HumanDuration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            addr: ":8443".to_string(),
            cert_path: "/var/run/certs/tls.crt".to_string(),
            key_path: "/var/run/certs/tls.key".to_string(),
            read_timeout: HumanDuration::from_secs(20),
            write_timeout: HumanDuration::from_secs(20),
        }
    }
}

/// Failure to load the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading configuration: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid YAML for this schema.
    #[error("parsing configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Config {
    /// Load configuration from a YAML file, layering it over the defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path)?;

        if contents.trim().is_empty() {
            return Ok(Config::default());
        }

        Ok(serde_yaml::from_str(&contents)?)
    }
}
