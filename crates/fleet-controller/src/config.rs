//! fleet.toml configuration and setting resolution.
//!
//! The file only supplies defaults for connection settings. Flags and
//! environment variables (resolved by clap) always win over it.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use fleet_core::parse_duration;

pub const DEFAULT_SERVER: &str = "http://localhost:8075";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(25);
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub provisioner: ProvisionerConfig,
    pub metrics: MetricsConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionerConfig {
    pub server: Option<String>,
    pub request_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub url: Option<String>,
    pub query_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` when given, otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Provisioning server address and request timeout.
    pub fn provisioner_settings(&self, flag: Option<&str>) -> anyhow::Result<Endpoint> {
        let url = pick(flag, self.provisioner.server.as_deref())
            .unwrap_or(DEFAULT_SERVER)
            .to_string();
        if url.trim().is_empty() {
            bail!("server value must be defined");
        }
        let timeout = timeout_or(
            self.provisioner.request_timeout.as_deref(),
            DEFAULT_REQUEST_TIMEOUT,
            "provisioner.request_timeout",
        )?;
        Ok(Endpoint { url, timeout })
    }

    /// Metrics backend address and query timeout. There is no default
    /// address; scale and hibernate refuse to run without one.
    pub fn metrics_settings(&self, flag: Option<&str>) -> anyhow::Result<Endpoint> {
        let Some(url) = pick(flag, self.metrics.url.as_deref()) else {
            bail!("metrics-url value must be defined");
        };
        let timeout = timeout_or(
            self.metrics.query_timeout.as_deref(),
            DEFAULT_QUERY_TIMEOUT,
            "metrics.query_timeout",
        )?;
        Ok(Endpoint {
            url: url.to_string(),
            timeout,
        })
    }

    /// Webhook URL, if reports should be delivered at all.
    pub fn webhook_url<'a>(&'a self, flag: Option<&'a str>) -> Option<&'a str> {
        pick(flag, self.notify.webhook_url.as_deref())
    }
}

/// A resolved remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub timeout: Duration,
}

fn pick<'a>(flag: Option<&'a str>, file: Option<&'a str>) -> Option<&'a str> {
    flag.filter(|v| !v.is_empty())
        .or_else(|| file.filter(|v| !v.is_empty()))
}

fn timeout_or(value: Option<&str>, default: Duration, key: &str) -> anyhow::Result<Duration> {
    match value {
        Some(value) => parse_duration(value).with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}
