// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing Kafka and Rabbit clients.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, Weak};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::agent::{AgentClient, BrokerKind};
use crate::classifier::Classifier;
use crate::config::{ClientOption, ConfigBuilder, Configuration};
use crate::context::CallContext;
use crate::error::{MaasError, Result};
use crate::model::{InvalidationEvent, QueueAddress, Tenant, TopicAddress};
use crate::watch::{ConnectionState, InvalidationChannel, Listener, ListenerId};

/// Broker family marker.
pub trait Broker: Send + Sync + 'static {
    const KIND: BrokerKind;
    type Address: DeserializeOwned + Send + 'static;
}

#[derive(Debug)]
pub enum Kafka {}

#[derive(Debug)]
pub enum Rabbit {}

impl Broker for Kafka {
    const KIND: BrokerKind = BrokerKind::Kafka;
    type Address = TopicAddress;
}

impl Broker for Rabbit {
    const KIND: BrokerKind = BrokerKind::Rabbit;
    type Address = QueueAddress;
}

pub type KafkaClient = MaasClient<Kafka>;
pub type RabbitClient = MaasClient<Rabbit>;

/// Callback for tenant-wide re-resolution results.
pub type TenantCallback<T> = Arc<dyn Fn(Result<Vec<T>>) + Send + Sync>;

/// Resolves classifiers for one broker family and watches for invalidations.
pub struct MaasClient<B: Broker> {
    config: Configuration,
    agent: AgentClient,
    channel: OnceLock<Arc<InvalidationChannel>>,
    _broker: PhantomData<fn() -> B>,
}

impl<B: Broker> MaasClient<B> {
    /// Build from a finished configuration. Never touches the network.
    pub fn new(config: Configuration) -> Self {
        let agent = AgentClient::from_config(&config);
        Self { config, agent, channel: OnceLock::new(), _broker: PhantomData }
    }

    /// Build from process settings plus `options`, applied in order.
    pub fn with_options(options: impl IntoIterator<Item = ClientOption>) -> Self {
        Self::new(ConfigBuilder::new().options(options).build())
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Resolve `classifier`, defaulting its namespace to the client's.
    ///
    /// `Ok(None)` when the agent has no matching topology.
    pub async fn resolve(
        &self,
        cx: &CallContext,
        classifier: &Classifier,
    ) -> Result<Option<B::Address>> {
        let classifier = classifier.clone().or_namespace(self.config.namespace());
        self.agent.resolve(cx, B::KIND, &classifier).await
    }

    fn channel(&self) -> &Arc<InvalidationChannel> {
        self.channel.get_or_init(|| {
            Arc::new(InvalidationChannel::new(
                self.config.tenant_manager_url(),
                Arc::clone(self.config.stomp_dialer()),
                self.config.auth_supplier().cloned(),
                self.config.reconnect(),
            ))
        })
    }

    /// State of the invalidation connection; `Disconnected` until first watch.
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.get().map_or(ConnectionState::Disconnected, |c| c.state())
    }

    /// Channel handle for observing connection state changes.
    pub fn invalidation_channel(&self) -> Arc<InvalidationChannel> {
        Arc::clone(self.channel())
    }

    /// Register `listener` for invalidations in the classifier's namespace.
    ///
    /// The listener sees every event of the namespace; use
    /// [`InvalidationEvent::affects`] to filter for this classifier.
    pub fn watch(&self, classifier: &Classifier, listener: Listener) -> Result<WatchHandle> {
        let namespace = classifier.namespace().unwrap_or(self.config.namespace()).to_owned();
        let channel = self.channel();
        let id = channel.subscribe(&namespace, listener)?;
        Ok(WatchHandle { id, channel: Arc::downgrade(channel) })
    }

    /// Re-resolve `classifier` for every active tenant whenever the tenant
    /// set of its namespace changes.
    ///
    /// Resolution runs off the channel task, one event at a time. Tenants the
    /// agent has no topology for are skipped.
    pub fn watch_tenants(
        &self,
        classifier: &Classifier,
        callback: TenantCallback<B::Address>,
    ) -> Result<WatchHandle> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| MaasError::connection(self.config.tenant_manager_url(), e))?;
        let base = classifier.clone().or_namespace(self.config.namespace());
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Tenant>>();

        let agent = self.agent.clone();
        let worker_base = base.clone();
        handle.spawn(async move {
            while let Some(tenants) = rx.recv().await {
                let result = resolve_tenants::<B>(&agent, &worker_base, &tenants).await;
                if let Err(ref e) = result {
                    tracing::warn!(classifier = %worker_base, err = %e, "tenant re-resolution failed");
                }
                callback(result);
            }
        });

        let listener: Listener = Arc::new(move |event: &InvalidationEvent| {
            if event.tenants.is_empty() {
                return;
            }
            let _ = tx.send(event.tenants.clone());
        });
        self.watch(&base, listener)
    }

    /// Close the invalidation channel, if one was started. Idempotent.
    pub async fn close(&self) {
        if let Some(channel) = self.channel.get() {
            channel.close().await;
        }
    }
}

impl MaasClient<Kafka> {
    /// Resolve the Kafka topic for `classifier`.
    pub async fn get_topic(
        &self,
        cx: &CallContext,
        classifier: &Classifier,
    ) -> Result<Option<TopicAddress>> {
        self.resolve(cx, classifier).await
    }

    pub fn watch_tenant_topics(
        &self,
        classifier: &Classifier,
        callback: impl Fn(Result<Vec<TopicAddress>>) + Send + Sync + 'static,
    ) -> Result<WatchHandle> {
        self.watch_tenants(classifier, Arc::new(callback))
    }
}

impl MaasClient<Rabbit> {
    /// Resolve the Rabbit queue for `classifier`.
    pub async fn get_queue(
        &self,
        cx: &CallContext,
        classifier: &Classifier,
    ) -> Result<Option<QueueAddress>> {
        self.resolve(cx, classifier).await
    }

    pub fn watch_tenant_queues(
        &self,
        classifier: &Classifier,
        callback: impl Fn(Result<Vec<QueueAddress>>) + Send + Sync + 'static,
    ) -> Result<WatchHandle> {
        self.watch_tenants(classifier, Arc::new(callback))
    }
}

/// Kafka client from process settings plus `options`.
pub fn new_kafka_client(options: impl IntoIterator<Item = ClientOption>) -> KafkaClient {
    KafkaClient::with_options(options)
}

/// Rabbit client from process settings plus `options`.
pub fn new_rabbit_client(options: impl IntoIterator<Item = ClientOption>) -> RabbitClient {
    RabbitClient::with_options(options)
}

async fn resolve_tenants<B: Broker>(
    agent: &AgentClient,
    base: &Classifier,
    tenants: &[Tenant],
) -> Result<Vec<B::Address>> {
    let cx = CallContext::background();
    let mut out = Vec::new();
    for tenant in tenants.iter().filter(|t| t.is_active()) {
        let classifier = base.clone().with_tenant_id(&tenant.external_id);
        if let Some(address) = agent.resolve::<B::Address>(&cx, B::KIND, &classifier).await? {
            out.push(address);
        }
    }
    Ok(out)
}

/// Registration returned by [`MaasClient::watch`].
#[derive(Debug)]
pub struct WatchHandle {
    id: ListenerId,
    channel: Weak<InvalidationChannel>,
}

impl WatchHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn cancel(self) -> bool {
        self.channel.upgrade().is_some_and(|c| c.unsubscribe(self.id))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
