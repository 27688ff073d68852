// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes for the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthenticationFailed,
    ResolutionFailed,
    ConnectionFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::ResolutionFailed => "RESOLUTION_FAILED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResolutionFailed | Self::ConnectionFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by resolution calls and the invalidation channel.
///
/// "Not found" is not an error: resolution returns `Ok(None)` for it.
#[derive(thiserror::Error, Debug)]
pub enum MaasError {
    #[error("credential supplier failed: {0:#}")]
    Authentication(#[source] anyhow::Error),
    #[error("agent returned {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("malformed agent response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },
    #[error("call cancelled")]
    Cancelled,
}

impl MaasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::AuthenticationFailed,
            Self::Status { .. } | Self::Transport { .. } | Self::Decode { .. } => {
                ErrorKind::ResolutionFailed
            }
            Self::Connection { .. } => ErrorKind::ConnectionFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn connection(url: &str, reason: impl fmt::Display) -> Self {
        Self::Connection { url: url.to_owned(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, MaasError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
