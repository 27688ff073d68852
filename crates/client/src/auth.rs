// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential suppliers.
//!
//! A supplier is invoked once per outbound call; tokens are never cached by
//! the resolver. Any `Fn(CallContext) -> impl Future<Output = anyhow::Result<String>>`
//! closure is a supplier.

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::context::CallContext;

/// Asynchronous bearer-token source.
pub trait TokenSupplier: Send + Sync {
    /// Fetch a token. Implementations should give up once `cx` is done.
    fn token(&self, cx: CallContext) -> BoxFuture<'_, anyhow::Result<String>>;
}

impl<F, Fut> TokenSupplier for F
where
    F: Fn(CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    fn token(&self, cx: CallContext) -> BoxFuture<'_, anyhow::Result<String>> {
        (self)(cx).boxed()
    }
}

/// Fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSupplier for StaticToken {
    fn token(&self, _cx: CallContext) -> BoxFuture<'_, anyhow::Result<String>> {
        let token = self.0.clone();
        async move { Ok(token) }.boxed()
    }
}

/// Token read from a mounted file on every call (e.g. a projected
/// service-account token that the platform rotates in place).
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

/// Default location of the Kubernetes service-account token.
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn service_account() -> Self {
        Self::new(SERVICE_ACCOUNT_TOKEN_PATH)
    }
}

impl TokenSupplier for TokenFile {
    fn token(&self, cx: CallContext) -> BoxFuture<'_, anyhow::Result<String>> {
        async move {
            let read = tokio::fs::read_to_string(&self.path);
            let contents = tokio::select! {
                _ = cx.done() => anyhow::bail!("cancelled while reading {}", self.path.display()),
                res = read => res.with_context(|| format!("reading {}", self.path.display()))?,
            };
            let token = contents.trim();
            if token.is_empty() {
                anyhow::bail!("token file {} is empty", self.path.display());
            }
            Ok(token.to_owned())
        }
        .boxed()
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
