// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client library for MaaS classifier resolution.
//!
//! A [`KafkaClient`] or [`RabbitClient`] resolves a [`Classifier`] to broker
//! coordinates through the MaaS agent, and can watch the tenant manager for
//! invalidations over a shared STOMP channel.

use std::sync::Once;

pub mod agent;
pub mod auth;
pub mod classifier;
pub mod client;
pub mod config;
pub mod context;
pub mod dialer;
pub mod error;
pub mod model;
pub mod settings;
pub mod stomp;
pub mod watch;

pub use classifier::Classifier;
pub use client::{
    new_kafka_client, new_rabbit_client, KafkaClient, MaasClient, RabbitClient, WatchHandle,
};
pub use config::{ClientOption, ConfigBuilder, Configuration};
pub use context::CallContext;
pub use error::{ErrorKind, MaasError, Result};
pub use model::{InvalidationEvent, QueueAddress, Tenant, TopicAddress};
pub use watch::{ConnectionState, Listener, ReconnectPolicy};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest and rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
