// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket dialer for the tenant-manager notification stream.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

/// STOMP 1.2 WebSocket subprotocol name.
pub const STOMP_SUBPROTOCOL: &str = "v12.stomp";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections with a fixed TLS setup and handshake timeout.
#[derive(Clone)]
pub struct StompDialer {
    tls: Option<Arc<rustls::ClientConfig>>,
    handshake_timeout: Duration,
}

impl std::fmt::Debug for StompDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompDialer")
            .field("tls", &self.tls.is_some())
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl Default for StompDialer {
    fn default() -> Self {
        Self { tls: None, handshake_timeout: Duration::from_secs(10) }
    }
}

impl StompDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` for `wss://` connections instead of the built-in webpki roots.
    pub fn with_tls(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn tls(&self) -> Option<&Arc<rustls::ClientConfig>> {
        self.tls.as_ref()
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Dialer trusting the PEM certificates in `ca_path`.
    pub fn from_ca_file(ca_path: &Path) -> anyhow::Result<Self> {
        Ok(Self::default().with_tls(tls_config_from_ca_file(ca_path)?))
    }

    /// Dialer for process settings: a CA bundle when one is configured,
    /// otherwise the webpki roots.
    pub fn from_settings(settings: &crate::settings::Settings) -> Self {
        let Some(ref ca_path) = settings.tls_ca_path else {
            return Self::default();
        };
        match Self::from_ca_file(ca_path) {
            Ok(dialer) => dialer,
            Err(e) => {
                tracing::warn!(
                    path = %ca_path.display(),
                    err = %format!("{e:#}"),
                    "failed to load CA bundle, using default roots"
                );
                Self::default()
            }
        }
    }

    /// Open a WebSocket to `url`, offering the STOMP subprotocol and
    /// attaching `token` as a bearer credential on the upgrade request.
    pub async fn dial(&self, url: &str, token: Option<&str>) -> anyhow::Result<WsStream> {
        crate::ensure_crypto();

        let mut request =
            url.into_client_request().with_context(|| format!("invalid websocket url {url}"))?;
        let headers = request.headers_mut();
        headers.insert("Sec-WebSocket-Protocol", HeaderValue::from_static(STOMP_SUBPROTOCOL));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("token is not a valid header value")?;
            headers.insert("Authorization", value);
        }

        let connector = self.tls.as_ref().map(|cfg| Connector::Rustls(Arc::clone(cfg)));
        let connect =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let (stream, _resp) = tokio::time::timeout(self.handshake_timeout, connect)
            .await
            .with_context(|| format!("websocket handshake timed out after {:?}", self.handshake_timeout))??;
        Ok(stream)
    }
}

fn tls_config_from_ca_file(ca_path: &Path) -> anyhow::Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    let certs = CertificateDer::pem_file_iter(ca_path)
        .with_context(|| format!("reading {}", ca_path.display()))?;
    for cert in certs {
        let cert = cert.with_context(|| format!("parsing {}", ca_path.display()))?;
        roots.add(cert).context("adding CA certificate")?;
    }
    if roots.is_empty() {
        anyhow::bail!("no certificates in {}", ca_path.display());
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("building TLS config")?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Rewrite an `http(s)` base URL to `ws(s)` and append `path`.
pub fn ws_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    format!("{ws_base}{path}")
}

#[cfg(test)]
#[path = "dialer_tests.rs"]
mod tests;
