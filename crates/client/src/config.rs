// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration: process defaults plus ordered overrides.
//!
//! Options are applied in the order given; a later option for the same field
//! replaces an earlier one. The built [`Configuration`] is immutable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::auth::TokenSupplier;
use crate::dialer::StompDialer;
use crate::settings::Settings;
use crate::watch::ReconnectPolicy;

/// Timeout of the default HTTP client.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolution HTTP client, or why the default one could not be built.
pub(crate) type HttpClientSlot = std::result::Result<Arc<Client>, Arc<reqwest::Error>>;

/// A single configuration override.
#[derive(Clone)]
pub enum ClientOption {
    HttpClient(Arc<Client>),
    Namespace(String),
    MaasAgentUrl(String),
    TenantManagerUrl(String),
    StompDialer(Arc<StompDialer>),
    AuthSupplier(Arc<dyn TokenSupplier>),
    RequestTimeout(Duration),
    Reconnect(ReconnectPolicy),
}

impl fmt::Debug for ClientOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpClient(_) => f.write_str("HttpClient(..)"),
            Self::Namespace(ns) => write!(f, "Namespace({ns:?})"),
            Self::MaasAgentUrl(url) => write!(f, "MaasAgentUrl({url:?})"),
            Self::TenantManagerUrl(url) => write!(f, "TenantManagerUrl({url:?})"),
            Self::StompDialer(d) => write!(f, "StompDialer({d:?})"),
            Self::AuthSupplier(_) => f.write_str("AuthSupplier(..)"),
            Self::RequestTimeout(t) => write!(f, "RequestTimeout({t:?})"),
            Self::Reconnect(p) => write!(f, "Reconnect({p:?})"),
        }
    }
}

pub fn with_http_client(client: impl Into<Arc<Client>>) -> ClientOption {
    ClientOption::HttpClient(client.into())
}

pub fn with_namespace(namespace: impl Into<String>) -> ClientOption {
    ClientOption::Namespace(namespace.into())
}

pub fn with_maas_agent_url(url: impl Into<String>) -> ClientOption {
    ClientOption::MaasAgentUrl(url.into())
}

pub fn with_tenant_manager_url(url: impl Into<String>) -> ClientOption {
    ClientOption::TenantManagerUrl(url.into())
}

pub fn with_stomp_dialer(dialer: impl Into<Arc<StompDialer>>) -> ClientOption {
    ClientOption::StompDialer(dialer.into())
}

pub fn with_auth_supplier(supplier: impl TokenSupplier + 'static) -> ClientOption {
    ClientOption::AuthSupplier(Arc::new(supplier))
}

pub fn with_request_timeout(timeout: Duration) -> ClientOption {
    ClientOption::RequestTimeout(timeout)
}

pub fn with_reconnect_policy(policy: ReconnectPolicy) -> ClientOption {
    ClientOption::Reconnect(policy)
}

/// Immutable configuration snapshot shared by a client and its channel.
#[derive(Clone)]
pub struct Configuration {
    http_client: HttpClientSlot,
    namespace: String,
    maas_agent_url: String,
    tenant_manager_url: String,
    stomp_dialer: Arc<StompDialer>,
    auth_supplier: Option<Arc<dyn TokenSupplier>>,
    request_timeout: Option<Duration>,
    reconnect: ReconnectPolicy,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("namespace", &self.namespace)
            .field("maas_agent_url", &self.maas_agent_url)
            .field("tenant_manager_url", &self.tenant_manager_url)
            .field("stomp_dialer", &self.stomp_dialer)
            .field("auth_supplier", &self.auth_supplier.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    /// `None` when no client was given and the default failed to build;
    /// resolution calls then report the build error.
    pub fn http_client(&self) -> Option<&Arc<Client>> {
        self.http_client.as_ref().ok()
    }

    pub(crate) fn http_client_slot(&self) -> &HttpClientSlot {
        &self.http_client
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn maas_agent_url(&self) -> &str {
        &self.maas_agent_url
    }

    pub fn tenant_manager_url(&self) -> &str {
        &self.tenant_manager_url
    }

    pub fn stomp_dialer(&self) -> &Arc<StompDialer> {
        &self.stomp_dialer
    }

    pub fn auth_supplier(&self) -> Option<&Arc<dyn TokenSupplier>> {
        self.auth_supplier.as_ref()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn reconnect(&self) -> ReconnectPolicy {
        self.reconnect
    }
}

/// Builder collecting overrides on top of process settings.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    settings: Settings,
    options: Vec<ClientOption>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Start from the process environment.
    pub fn new() -> Self {
        Self::from_settings(Settings::from_env())
    }

    pub fn from_settings(settings: Settings) -> Self {
        Self { settings, options: Vec::new() }
    }

    pub fn option(mut self, option: ClientOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn options(mut self, options: impl IntoIterator<Item = ClientOption>) -> Self {
        self.options.extend(options);
        self
    }

    pub fn http_client(self, client: impl Into<Arc<Client>>) -> Self {
        self.option(with_http_client(client))
    }

    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.option(with_namespace(namespace))
    }

    pub fn maas_agent_url(self, url: impl Into<String>) -> Self {
        self.option(with_maas_agent_url(url))
    }

    pub fn tenant_manager_url(self, url: impl Into<String>) -> Self {
        self.option(with_tenant_manager_url(url))
    }

    pub fn stomp_dialer(self, dialer: impl Into<Arc<StompDialer>>) -> Self {
        self.option(with_stomp_dialer(dialer))
    }

    pub fn auth_supplier(self, supplier: impl TokenSupplier + 'static) -> Self {
        self.option(with_auth_supplier(supplier))
    }

    pub fn request_timeout(self, timeout: Duration) -> Self {
        self.option(with_request_timeout(timeout))
    }

    pub fn reconnect_policy(self, policy: ReconnectPolicy) -> Self {
        self.option(with_reconnect_policy(policy))
    }

    pub fn build(self) -> Configuration {
        configure(self.settings, self.options)
    }
}

/// Apply `options` in order over defaults taken from `settings`.
pub fn configure(
    settings: Settings,
    options: impl IntoIterator<Item = ClientOption>,
) -> Configuration {
    let mut http_client = None;
    let mut stomp_dialer = None;
    let mut cfg = PartialConfig {
        namespace: settings.namespace.clone(),
        maas_agent_url: settings.maas_agent_url.clone(),
        tenant_manager_url: settings.tenant_manager_url.clone(),
        auth_supplier: None,
        request_timeout: None,
        reconnect: ReconnectPolicy::default(),
    };

    for option in options {
        match option {
            ClientOption::HttpClient(c) => http_client = Some(c),
            ClientOption::Namespace(ns) => cfg.namespace = ns,
            ClientOption::MaasAgentUrl(url) => cfg.maas_agent_url = url,
            ClientOption::TenantManagerUrl(url) => cfg.tenant_manager_url = url,
            ClientOption::StompDialer(d) => stomp_dialer = Some(d),
            ClientOption::AuthSupplier(s) => cfg.auth_supplier = Some(s),
            ClientOption::RequestTimeout(t) => cfg.request_timeout = Some(t),
            ClientOption::Reconnect(p) => cfg.reconnect = p,
        }
    }

    // Defaults for the heavier handles are only built when not overridden.
    let http_client = match http_client {
        Some(client) => Ok(client),
        None => default_http_client().map(Arc::new).map_err(|e| {
            tracing::error!(err = %e, "cannot build HTTP client, resolution calls will fail");
            Arc::new(e)
        }),
    };
    let stomp_dialer =
        stomp_dialer.unwrap_or_else(|| Arc::new(StompDialer::from_settings(&settings)));

    Configuration {
        http_client,
        namespace: cfg.namespace,
        maas_agent_url: cfg.maas_agent_url,
        tenant_manager_url: cfg.tenant_manager_url,
        stomp_dialer,
        auth_supplier: cfg.auth_supplier,
        request_timeout: cfg.request_timeout,
        reconnect: cfg.reconnect,
    }
}

struct PartialConfig {
    namespace: String,
    maas_agent_url: String,
    tenant_manager_url: String,
    auth_supplier: Option<Arc<dyn TokenSupplier>>,
    request_timeout: Option<Duration>,
    reconnect: ReconnectPolicy,
}

fn default_http_client() -> reqwest::Result<Client> {
    crate::ensure_crypto();
    Client::builder().timeout(DEFAULT_HTTP_TIMEOUT).build().or_else(|e| {
        tracing::warn!(err = %e, "default HTTP client rejected, retrying without timeout");
        Client::builder().build()
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
