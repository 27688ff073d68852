// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolved coordinates and invalidation events.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;

/// Kafka topic coordinates returned by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicAddress {
    /// Physical topic name.
    pub name: String,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Bootstrap servers keyed by security protocol (`PLAINTEXT`, `SASL_SSL`, ...).
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_partitions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    /// Client credentials keyed by role.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credential: BTreeMap<String, Vec<BrokerCredential>>,
}

impl TopicAddress {
    pub fn bootstrap_servers(&self, protocol: &str) -> Option<&[String]> {
        self.addresses.get(protocol).map(Vec::as_slice)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.addresses.keys().map(String::as_str)
    }
}

/// Username/password or SCRAM credential handed out with broker coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerCredential {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// RabbitMQ queue coordinates returned by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAddress {
    /// Queue name.
    pub name: String,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    /// AMQP connection URI for the vhost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Tenant record carried by tenant-manager notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("ACTIVE")
    }
}

/// Kind of topology change reported by the tenant manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    /// Initial snapshot sent right after a subscription is established.
    Subscribed,
    Created,
    Modified,
    Deleted,
}

/// What an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Everything resolved in the namespace is stale.
    Namespace,
    /// Only coordinates whose classifier contains these tags are stale.
    Classifier(Classifier),
}

/// Notification that previously resolved coordinates may be stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    pub namespace: String,
    pub kind: ChangeKind,
    pub scope: InvalidationScope,
    pub tenants: Vec<Tenant>,
}

impl InvalidationEvent {
    /// Whether coordinates resolved for `classifier` are affected.
    pub fn affects(&self, classifier: &Classifier) -> bool {
        if classifier.namespace().is_some_and(|ns| ns != self.namespace) {
            return false;
        }
        match &self.scope {
            InvalidationScope::Namespace => true,
            InvalidationScope::Classifier(scope) => scope.is_subset_of(classifier),
        }
    }
}
