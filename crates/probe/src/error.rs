//! Probe Error Types

use thiserror::Error;

/// Failures talking to a subgraph or RPC endpoint
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Endpoint refused the credential (payment or auth required)
    #[error("HTTP {status} (credential rejected)")]
    AuthRejected { status: u16 },

    /// Any other non-success HTTP status
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// Request did not complete within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Connection or body-read failure
    #[error("Network error: {0}")]
    Network(String),

    /// JSON-RPC level error from the chain provider
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl TransportError {
    /// Whether another credential might succeed where this one failed
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, TransportError::AuthRejected { .. })
    }

    /// Classify an HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 402 | 403 => TransportError::AuthRejected { status },
            _ => TransportError::Http { status },
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = err.status() {
            TransportError::from_status(status.as_u16())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Why a probe produced no sample
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// The source's locator could not be resolved to a URL
    #[error("{0}")]
    Configuration(String),

    /// Network/HTTP failure, including exhausted credentials
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Response was well-formed but lacked expected fields
    #[error("{0}")]
    Data(String),
}

impl ProbeError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::Configuration(_) => "configuration",
            ProbeError::Transport(_) => "transport",
            ProbeError::Data(_) => "data",
        }
    }
}

/// Source list administration failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Source must have name and chain")]
    Incomplete,

    #[error("Source with name \"{0}\" already exists")]
    Duplicate(String),

    #[error("Source \"{0}\" not found")]
    NotFound(String),

    #[error("Sources file {path}: {reason}")]
    File { path: String, reason: String },
}
