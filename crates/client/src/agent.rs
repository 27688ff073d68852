// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for classifier resolution against the MaaS agent.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::auth::TokenSupplier;
use crate::classifier::Classifier;
use crate::config::{Configuration, HttpClientSlot};
use crate::context::CallContext;
use crate::error::{MaasError, Result};

/// Longest slice of an error response body kept in the error message.
const MAX_ERROR_BODY: usize = 512;

/// Broker family served by an agent endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Kafka,
    Rabbit,
}

impl BrokerKind {
    /// Agent path of the get-by-classifier endpoint.
    pub fn resolve_path(&self) -> &'static str {
        match self {
            Self::Kafka => "/api/v1/kafka/topic/get-by-classifier",
            Self::Rabbit => "/api/v1/rabbit/queue/get-by-classifier",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Rabbit => "rabbit",
        }
    }
}

/// Resolution client for one agent. Cheap to clone; stateless per call.
#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    client: HttpClientSlot,
    supplier: Option<Arc<dyn TokenSupplier>>,
    request_timeout: Option<Duration>,
}

impl AgentClient {
    pub fn new(
        base_url: impl Into<String>,
        client: Arc<Client>,
        supplier: Option<Arc<dyn TokenSupplier>>,
    ) -> Self {
        Self::with_slot(base_url, Ok(client), supplier)
    }

    /// Agent client sharing `config`'s HTTP client, supplier, and timeout.
    pub fn from_config(config: &Configuration) -> Self {
        Self::with_slot(
            config.maas_agent_url(),
            config.http_client_slot().clone(),
            config.auth_supplier().cloned(),
        )
        .with_request_timeout(config.request_timeout())
    }

    fn with_slot(
        base_url: impl Into<String>,
        client: HttpClientSlot,
        supplier: Option<Arc<dyn TokenSupplier>>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client, supplier, request_timeout: None }
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch a fresh token when a supplier is configured.
    async fn token(&self, cx: &CallContext) -> Result<Option<String>> {
        let Some(ref supplier) = self.supplier else {
            return Ok(None);
        };
        tokio::select! {
            _ = cx.done() => Err(MaasError::Cancelled),
            res = supplier.token(cx.clone()) => match res {
                Ok(token) => Ok(Some(token)),
                Err(e) => Err(MaasError::Authentication(e)),
            },
        }
    }

    /// Resolve `classifier` to broker coordinates.
    ///
    /// `Ok(None)` means the agent has no topology for the classifier.
    pub async fn resolve<T: DeserializeOwned>(
        &self,
        cx: &CallContext,
        broker: BrokerKind,
        classifier: &Classifier,
    ) -> Result<Option<T>> {
        if cx.is_done() {
            return Err(MaasError::Cancelled);
        }
        let url = self.url(broker.resolve_path());
        let client = match self.client {
            Ok(ref client) => client,
            Err(ref e) => return Err(MaasError::connection(&url, format!("no HTTP client: {e}"))),
        };
        let token = self.token(cx).await?;

        let mut req = client.post(&url).json(classifier);
        if let Some(ref token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(timeout) = self.request_timeout {
            req = req.timeout(timeout);
        }

        tracing::debug!(broker = broker.as_str(), %classifier, "resolving classifier");
        let exchange = async {
            let resp = req.send().await?;
            let status = resp.status();
            let bytes = resp.bytes().await?;
            Ok::<_, reqwest::Error>((status, bytes))
        };
        let (status, bytes) = tokio::select! {
            _ = cx.done() => return Err(MaasError::Cancelled),
            res = exchange => res.map_err(|source| MaasError::Transport { url: url.clone(), source })?,
        };

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(broker = broker.as_str(), %classifier, "no topology registered");
            return Ok(None);
        }
        if !status.is_success() {
            let body = truncate_body(&bytes);
            tracing::warn!(broker = broker.as_str(), status = status.as_u16(), %classifier, "resolution failed");
            return Err(MaasError::Status { url, status: status.as_u16(), body });
        }

        let value = serde_json::from_slice(&bytes).map_err(|source| MaasError::Decode { url, source })?;
        Ok(Some(value))
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
