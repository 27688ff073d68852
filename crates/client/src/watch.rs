// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Invalidation channel: one STOMP-over-WebSocket connection to the tenant
//! manager, shared by every namespace a client watches.
//!
//! A single background task owns the socket. It connects on the first
//! subscription, resubscribes all namespaces after each reconnect, hangs up
//! once no namespace is watched, and invokes listeners on its own task in
//! the order frames arrive. Listeners must not block: a slow listener
//! delays every other namespace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenSupplier;
use crate::classifier::Classifier;
use crate::context::CallContext;
use crate::dialer::{ws_url, StompDialer, WsStream};
use crate::error::{MaasError, Result};
use crate::model::{ChangeKind, InvalidationEvent, InvalidationScope, Tenant};
use crate::stomp::{Command, Frame};

/// Tenant-manager watch endpoint, relative to the tenant-manager URL.
pub const WATCH_PATH: &str = "/api/v4/tenant-manager/watch";

const DESTINATION_PREFIX: &str = "/channels/tenants/";
const DISCONNECT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(1);

/// STOMP destination carrying invalidations for `namespace`.
pub fn destination(namespace: &str) -> String {
    format!("{DESTINATION_PREFIX}{namespace}")
}

/// Reconnect backoff bounds. The delay doubles after each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { initial_backoff: Duration::from_millis(100), max_backoff: Duration::from_secs(5) }
    }
}

impl ReconnectPolicy {
    pub fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_backoff)
    }

    /// `delay` plus up to 10% random jitter.
    fn jittered(delay: Duration) -> Duration {
        let spread = (delay.as_millis() / 10) as u64;
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=spread))
    }
}

/// Observable state of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected with at least one namespace subscription active.
    Subscribed,
    /// Closed by the owner; terminal.
    Closed,
}

/// Callback for invalidation events. Invoked on the channel task.
pub type Listener = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    namespaces: IndexMap<String, Vec<(ListenerId, Listener)>>,
    next_id: u64,
}

struct Shared {
    registry: Mutex<Registry>,
    closed: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        if self.closed.load(Ordering::Acquire) && state != ConnectionState::Closed {
            return;
        }
        self.state_tx.send_replace(state);
    }

    fn namespaces(&self) -> Vec<String> {
        self.registry.lock().namespaces.keys().cloned().collect()
    }

    fn is_idle(&self) -> bool {
        self.registry.lock().namespaces.is_empty()
    }

    /// Invoke every listener of `event.namespace` in registration order.
    fn dispatch(&self, event: &InvalidationEvent) {
        let listeners: Vec<Listener> = {
            let registry = self.registry.lock();
            match registry.namespaces.get(&event.namespace) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return,
            }
        };
        for listener in listeners {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            listener(event);
        }
    }
}

/// Persistent, auto-reconnecting notification channel.
pub struct InvalidationChannel {
    worker: Arc<Worker>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InvalidationChannel {
    /// Create a channel. Nothing connects until the first subscription.
    pub fn new(
        tenant_manager_url: &str,
        dialer: Arc<StompDialer>,
        supplier: Option<Arc<dyn TokenSupplier>>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            closed: AtomicBool::new(false),
            state_tx,
        });
        let worker = Arc::new(Worker {
            url: ws_url(tenant_manager_url, WATCH_PATH),
            dialer,
            supplier,
            policy,
            shared,
            changed: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        Self { worker, task: Mutex::new(None) }
    }

    pub fn url(&self) -> &str {
        &self.worker.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.worker.shared.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.worker.shared.state_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.worker.shared.closed.load(Ordering::Acquire)
    }

    /// Namespaces with at least one listener.
    pub fn namespaces(&self) -> Vec<String> {
        self.worker.shared.namespaces()
    }

    fn closed_error(&self) -> MaasError {
        MaasError::connection(&self.worker.url, "channel closed")
    }

    /// Register `listener` for invalidations in `namespace`.
    ///
    /// Registering the same listener for the same namespace again returns
    /// the existing id. Must be called from within a Tokio runtime; on error
    /// nothing is registered.
    pub fn subscribe(&self, namespace: &str, listener: Listener) -> Result<ListenerId> {
        self.ensure_started()?;

        let (id, first_for_namespace) = {
            let mut registry = self.worker.shared.registry.lock();
            // `close` clears the registry under this lock after setting the flag.
            if self.is_closed() {
                return Err(self.closed_error());
            }
            let existing = registry
                .namespaces
                .get(namespace)
                .and_then(|list| list.iter().find(|(_, l)| Arc::ptr_eq(l, &listener)))
                .map(|(id, _)| *id);
            if let Some(id) = existing {
                return Ok(id);
            }
            let id = ListenerId(registry.next_id);
            registry.next_id += 1;
            let list = registry.namespaces.entry(namespace.to_owned()).or_default();
            list.push((id, listener));
            (id, list.len() == 1)
        };

        if first_for_namespace {
            tracing::debug!(namespace, "watching namespace");
            self.worker.changed.notify_one();
        }
        Ok(id)
    }

    /// Remove a listener. The namespace subscription is dropped with its last listener.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let emptied = {
            let mut registry = self.worker.shared.registry.lock();
            let found = registry.namespaces.iter_mut().find_map(|(ns, list)| {
                let pos = list.iter().position(|(lid, _)| *lid == id)?;
                list.remove(pos);
                Some((ns.clone(), list.is_empty()))
            });
            match found {
                Some((ns, true)) => {
                    registry.namespaces.shift_remove(&ns);
                    Some(Some(ns))
                }
                Some((_, false)) => Some(None),
                None => None,
            }
        };
        match emptied {
            Some(Some(ns)) => {
                tracing::debug!(namespace = %ns, "no listeners left, unwatching namespace");
                self.worker.changed.notify_one();
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Spawn the connection task once. Fails when closed or outside a runtime.
    fn ensure_started(&self) -> Result<()> {
        let mut task = self.task.lock();
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if task.is_some() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| MaasError::connection(&self.worker.url, e))?;
        *task = Some(handle.spawn(Arc::clone(&self.worker).run()));
        Ok(())
    }

    /// Close the connection and drop all listeners. Idempotent.
    ///
    /// No listener is invoked once this starts, even for frames already read.
    pub async fn close(&self) {
        let shared = &self.worker.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.worker.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        shared.registry.lock().namespaces.clear();
        shared.set_state(ConnectionState::Closed);
    }
}

impl Drop for InvalidationChannel {
    fn drop(&mut self) {
        self.worker.shared.closed.store(true, Ordering::Release);
        self.worker.shutdown.cancel();
    }
}

/// How a connection ended.
enum Ended {
    Shutdown,
    /// Last namespace unwatched; the socket was closed on purpose.
    Idle,
    Dropped(String),
}

/// Connection-owning side of the channel.
struct Worker {
    url: String,
    dialer: Arc<StompDialer>,
    supplier: Option<Arc<dyn TokenSupplier>>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    /// Signalled whenever a namespace gains its first or loses its last listener.
    changed: Notify,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self: Arc<Self>) {
        let mut backoff = self.policy.initial_backoff;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.shared.is_idle() {
                self.shared.set_state(ConnectionState::Disconnected);
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.changed.notified() => continue,
                }
            }

            self.shared.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                res = self.connect() => res,
            };
            match connected {
                Ok(ws) => {
                    backoff = self.policy.initial_backoff;
                    self.shared.set_state(ConnectionState::Connected);
                    tracing::info!(url = %self.url, "invalidation channel connected");
                    match self.serve(ws).await {
                        Ended::Shutdown => break,
                        Ended::Idle => {
                            tracing::info!(url = %self.url, "no namespaces watched, invalidation channel idle");
                            continue;
                        }
                        Ended::Dropped(reason) => {
                            tracing::info!(url = %self.url, reason = %reason, "invalidation channel dropped");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        url = %self.url,
                        err = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "invalidation channel connect failed, retrying"
                    );
                }
            }

            self.shared.set_state(ConnectionState::Disconnected);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(ReconnectPolicy::jittered(backoff)) => {}
            }
            backoff = self.policy.next_backoff(backoff);
        }

        self.shared.set_state(ConnectionState::Closed);
        tracing::debug!(url = %self.url, "invalidation channel stopped");
    }

    /// Dial, authenticate, and complete the STOMP handshake.
    async fn connect(&self) -> Result<WsStream> {
        let timeout = self.dialer.handshake_timeout();
        let token = match self.supplier {
            Some(ref supplier) => {
                let cx = CallContext::with_cancel(self.shutdown.child_token()).with_timeout(timeout);
                let token = tokio::select! {
                    _ = cx.done() => return Err(MaasError::connection(&self.url, "token fetch timed out")),
                    res = supplier.token(cx.clone()) => res,
                };
                Some(token.map_err(|e| MaasError::connection(&self.url, format!("token: {e:#}")))?)
            }
            None => None,
        };

        let mut ws = self
            .dialer
            .dial(&self.url, token.as_deref())
            .await
            .map_err(|e| MaasError::connection(&self.url, format!("{e:#}")))?;

        let host = reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default();
        let connect = Frame::connect(&host, token.as_deref());
        ws.send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| MaasError::connection(&self.url, e))?;

        match tokio::time::timeout(timeout, next_frame(&mut ws)).await {
            Ok(Ok(frame)) if frame.command == Command::Connected => Ok(ws),
            Ok(Ok(frame)) if frame.command == Command::Error => {
                let message = frame.get("message").unwrap_or(frame.body.as_str()).to_owned();
                Err(MaasError::connection(&self.url, format!("rejected: {message}")))
            }
            Ok(Ok(frame)) => Err(MaasError::connection(
                &self.url,
                format!("unexpected {} frame during handshake", frame.command),
            )),
            Ok(Err(reason)) => Err(MaasError::connection(&self.url, reason)),
            Err(_) => Err(MaasError::connection(&self.url, "no CONNECTED frame")),
        }
    }

    /// Drive one established connection until it drops, goes idle, or the channel closes.
    async fn serve(&self, ws: WsStream) -> Ended {
        let (mut sink, mut stream) = ws.split();
        let mut subs = Subscriptions::default();
        let mut dirty = true;

        loop {
            if dirty {
                dirty = false;
                for frame in subs.reconcile(&self.shared.namespaces()) {
                    if let Err(e) = sink.send(Message::Text(frame.encode().into())).await {
                        return Ended::Dropped(e.to_string());
                    }
                }
                if subs.is_empty() {
                    self.disconnect(&mut sink, &mut stream).await;
                    return Ended::Idle;
                }
                self.shared.set_state(ConnectionState::Subscribed);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.disconnect(&mut sink, &mut stream).await;
                    return Ended::Shutdown;
                }
                _ = self.changed.notified() => dirty = true,
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reason) = self.handle_text(&subs, &text) {
                                return Ended::Dropped(reason);
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ended::Dropped("closed by peer".to_owned()),
                        Some(Err(e)) => return Ended::Dropped(e.to_string()),
                        Some(Ok(_)) => {} // ping/pong/binary ignored
                    }
                }
            }
        }
    }

    /// Handle one inbound text message. Returns a reason when the connection must drop.
    fn handle_text(&self, subs: &Subscriptions, text: &str) -> Option<String> {
        let frame = match Frame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(url = %self.url, err = %e, "dropping malformed frame");
                return None;
            }
        };

        match frame.command {
            Command::Message => {
                let Some(namespace) = subs.route(&frame) else {
                    tracing::debug!(url = %self.url, "message for unknown subscription");
                    return None;
                };
                match parse_event(namespace, &frame.body) {
                    Ok(event) => self.shared.dispatch(&event),
                    Err(e) => {
                        tracing::warn!(namespace, err = %e, "dropping unparseable invalidation");
                    }
                }
                None
            }
            Command::Error => {
                let message = frame.get("message").unwrap_or(frame.body.as_str()).to_owned();
                Some(format!("server error: {message}"))
            }
            _ => None,
        }
    }

    /// Best-effort DISCONNECT: wait briefly for the receipt, then close.
    async fn disconnect(
        &self,
        sink: &mut futures_util::stream::SplitSink<WsStream, Message>,
        stream: &mut futures_util::stream::SplitStream<WsStream>,
    ) {
        let receipt = uuid::Uuid::new_v4().to_string();
        let frame = Frame::disconnect(&receipt);
        if sink.send(Message::Text(frame.encode().into())).await.is_ok() {
            let wait = async {
                while let Some(Ok(msg)) = stream.next().await {
                    if let Message::Text(text) = msg {
                        if let Ok(Some(f)) = Frame::decode(&text) {
                            if f.command == Command::Receipt && f.get("receipt-id") == Some(receipt.as_str()) {
                                break;
                            }
                        }
                    }
                }
            };
            let _ = tokio::time::timeout(DISCONNECT_RECEIPT_TIMEOUT, wait).await;
        }
        let _ = sink.close().await;
    }
}

/// Read frames until a non-heart-beat one arrives.
async fn next_frame(ws: &mut WsStream) -> std::result::Result<Frame, String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => continue,
                Err(e) => return Err(e.to_string()),
            },
            Some(Ok(Message::Close(_))) | None => return Err("closed by peer".to_owned()),
            Some(Err(e)) => return Err(e.to_string()),
            Some(Ok(_)) => continue,
        }
    }
}

/// Subscription ids for one connection.
#[derive(Default)]
struct Subscriptions {
    by_namespace: HashMap<String, String>,
    by_id: HashMap<String, String>,
    next: u64,
}

impl Subscriptions {
    fn add(&mut self, namespace: &str) -> Frame {
        let id = format!("sub-{}", self.next);
        self.next += 1;
        self.by_namespace.insert(namespace.to_owned(), id.clone());
        self.by_id.insert(id.clone(), namespace.to_owned());
        Frame::subscribe(&id, &destination(namespace))
    }

    fn remove(&mut self, namespace: &str) -> Option<Frame> {
        let id = self.by_namespace.remove(namespace)?;
        self.by_id.remove(&id);
        Some(Frame::unsubscribe(&id))
    }

    /// Frames that bring this connection in line with `watched`:
    /// unsubscribes first, then subscribes in `watched` order.
    fn reconcile(&mut self, watched: &[String]) -> Vec<Frame> {
        let stale: Vec<String> = self
            .by_namespace
            .keys()
            .filter(|ns| !watched.contains(ns))
            .cloned()
            .collect();
        let mut frames: Vec<Frame> = stale.iter().filter_map(|ns| self.remove(ns)).collect();
        for ns in watched {
            if !self.by_namespace.contains_key(ns) {
                frames.push(self.add(ns));
            }
        }
        frames
    }

    fn is_empty(&self) -> bool {
        self.by_namespace.is_empty()
    }

    /// Namespace a MESSAGE belongs to: by subscription id, else by destination.
    fn route(&self, frame: &Frame) -> Option<&str> {
        if let Some(ns) = frame.get("subscription").and_then(|id| self.by_id.get(id)) {
            return Some(ns);
        }
        let ns = frame.get("destination")?.strip_prefix(DESTINATION_PREFIX)?;
        self.by_namespace.get_key_value(ns).map(|(k, _)| k.as_str())
    }
}

/// Body of a tenant-manager MESSAGE frame. Only `type` is required; the
/// rest is read leniently so one bad entry cannot hide the invalidation.
#[derive(Debug, Deserialize)]
struct WatchPayload {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    classifier: Option<serde_json::Value>,
    #[serde(default)]
    tenants: Option<serde_json::Value>,
}

fn parse_event(namespace: &str, body: &str) -> serde_json::Result<InvalidationEvent> {
    let payload: WatchPayload = serde_json::from_str(body)?;

    let scope = match payload.classifier {
        None | Some(serde_json::Value::Null) => InvalidationScope::Namespace,
        Some(raw) => match serde_json::from_value::<Classifier>(raw) {
            Ok(classifier) if !classifier.is_empty() => InvalidationScope::Classifier(classifier),
            Ok(_) => InvalidationScope::Namespace,
            Err(e) => {
                tracing::warn!(namespace, err = %e, "unreadable classifier, invalidating whole namespace");
                InvalidationScope::Namespace
            }
        },
    };

    let tenants = match payload.tenants {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Tenant>(raw) {
                Ok(tenant) => Some(tenant),
                Err(e) => {
                    tracing::warn!(namespace, err = %e, "skipping unreadable tenant");
                    None
                }
            })
            .collect(),
        Some(_) => {
            tracing::warn!(namespace, "tenants is not a list, ignoring");
            Vec::new()
        }
    };

    Ok(InvalidationEvent { namespace: namespace.to_owned(), kind: payload.kind, scope, tenants })
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;
