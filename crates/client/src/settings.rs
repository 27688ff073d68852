// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level defaults for new clients.
//!
//! Layered: built-in defaults, then an optional JSON file (`MAAS_CONFIG_FILE`),
//! then environment variables. Read once when a client is built.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAAS_AGENT_URL: &str = "http://maas-agent:8080";
pub const DEFAULT_TENANT_MANAGER_URL: &str = "ws://tenant-manager:8080";
pub const DEFAULT_NAMESPACE: &str = "default";

pub const ENV_CONFIG_FILE: &str = "MAAS_CONFIG_FILE";
pub const ENV_MAAS_AGENT_URL: &str = "MAAS_AGENT_URL";
pub const ENV_TENANT_MANAGER_URL: &str = "TENANT_MANAGER_URL";
pub const ENV_NAMESPACE: &str = "MICROSERVICE_NAMESPACE";
pub const ENV_CLOUD_NAMESPACE: &str = "CLOUD_NAMESPACE";
pub const ENV_TLS_CA_PATH: &str = "MAAS_TLS_CA_PATH";

/// Resolved process settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub maas_agent_url: String,
    pub tenant_manager_url: String,
    pub namespace: String,
    pub tls_ca_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            maas_agent_url: DEFAULT_MAAS_AGENT_URL.to_owned(),
            tenant_manager_url: DEFAULT_TENANT_MANAGER_URL.to_owned(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            tls_ca_path: None,
        }
    }
}

/// On-disk layout: `{"maas": {"agent": {"url": ..}}, "microservice": {"namespace": ..}, ...}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FileSettings {
    #[serde(default)]
    maas: Option<MaasSection>,
    #[serde(default)]
    tenant_manager: Option<UrlSection>,
    #[serde(default)]
    microservice: Option<MicroserviceSection>,
    #[serde(default)]
    tls: Option<TlsSection>,
}

#[derive(Debug, Default, Deserialize)]
struct MaasSection {
    #[serde(default)]
    agent: Option<UrlSection>,
}

#[derive(Debug, Default, Deserialize)]
struct UrlSection {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MicroserviceSection {
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TlsSection {
    #[serde(default)]
    ca_path: Option<PathBuf>,
}

impl Settings {
    /// Load from the process environment.
    ///
    /// A missing or broken config file is logged and skipped: building a
    /// client never fails on configuration.
    pub fn from_env() -> Self {
        match Self::load_with(|name| std::env::var(name).ok()) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(err = %format!("{e:#}"), "ignoring maas config file");
                Self::from_lookup(None, |name| std::env::var(name).ok())
            }
        }
    }

    /// Load using `get_env` for variable lookup, reading the file it names.
    pub fn load_with(get_env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let file = match get_env(ENV_CONFIG_FILE).filter(|p| !p.is_empty()) {
            Some(path) => Some(Self::read_file(Path::new(&path))?),
            None => None,
        };
        Ok(Self::from_lookup(file, get_env))
    }

    fn read_file(path: &Path) -> anyhow::Result<FileSettings> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    fn from_lookup(file: Option<FileSettings>, get_env: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(file) = file {
            if let Some(url) = file.maas.and_then(|m| m.agent).and_then(|a| a.url) {
                settings.maas_agent_url = url;
            }
            if let Some(url) = file.tenant_manager.and_then(|t| t.url) {
                settings.tenant_manager_url = url;
            }
            if let Some(ns) = file.microservice.and_then(|m| m.namespace) {
                settings.namespace = ns;
            }
            if let Some(path) = file.tls.and_then(|t| t.ca_path) {
                settings.tls_ca_path = Some(path);
            }
        }

        let env = |name: &str| get_env(name).filter(|v| !v.is_empty());
        if let Some(url) = env(ENV_MAAS_AGENT_URL) {
            settings.maas_agent_url = url;
        }
        if let Some(url) = env(ENV_TENANT_MANAGER_URL) {
            settings.tenant_manager_url = url;
        }
        if let Some(ns) = env(ENV_NAMESPACE).or_else(|| env(ENV_CLOUD_NAMESPACE)) {
            settings.namespace = ns;
        }
        if let Some(path) = env(ENV_TLS_CA_PATH) {
            settings.tls_ca_path = Some(PathBuf::from(path));
        }

        settings
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
