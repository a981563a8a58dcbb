//! Client error types.

use std::fmt;
use std::time::Duration;

use transloadit_protocol::ErrorEnvelope;
use transloadit_transfer::{StreamError, TransferError};

use crate::config::ConfigError;

/// A failure reported by the API, with whatever context it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// Machine-readable error token (e.g. `RATE_LIMIT_REACHED`).
    pub code: String,
    pub message: Option<String>,
    /// HTTP status, absent when the error was read from a 2xx body.
    pub http_status: Option<u16>,
    pub assembly_id: Option<String>,
    pub assembly_ssl_url: Option<String>,
    /// Server-suggested retry delay in seconds.
    pub retry_in: Option<f64>,
}

impl ApiError {
    /// Builds an error from a response body. Falls back to an `HTTP_<status>`
    /// code when the body carries no error token.
    pub fn from_body(body: &serde_json::Value, http_status: Option<u16>) -> Self {
        let envelope = ErrorEnvelope::from_body(body);
        let retry_in = envelope.retry_in();
        let code = envelope.error.unwrap_or_else(|| match http_status {
            Some(status) => format!("HTTP_{status}"),
            None => "UNKNOWN_ERROR".into(),
        });
        Self {
            code,
            message: envelope.message,
            http_status,
            assembly_id: envelope.assembly_id,
            assembly_ssl_url: envelope.assembly_ssl_url,
            retry_in,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        let envelope = ErrorEnvelope {
            error: Some(self.code.clone()),
            info: Some(transloadit_protocol::ErrorInfo {
                retry_in: self.retry_in,
            }),
            ..ErrorEnvelope::default()
        };
        self.http_status
            .is_some_and(|status| envelope.is_rate_limited(status))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "API error (HTTP {status}) {}", self.code)?,
            None => write!(f, "API error {}", self.code)?,
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(url) = &self.assembly_ssl_url {
            write!(f, " ({url})")?;
        } else if let Some(id) = &self.assembly_id {
            write!(f, " (assembly {id})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Errors produced by assembly operations.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// Bad arguments, detected before any network activity.
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Api(Box<ApiError>),

    /// The server answered successfully but without data the client needs.
    #[error("inconsistent response: {0}")]
    InconsistentResponse(String),

    #[error("assembly {assembly_id} still busy after {timeout:?}")]
    PollingTimeout {
        assembly_id: String,
        timeout: Duration,
    },

    #[error(transparent)]
    Stream(StreamError),

    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task failed: {0}")]
    Task(String),
}

impl AssemblyError {
    pub fn api(err: ApiError) -> Self {
        AssemblyError::Api(Box::new(err))
    }

    /// Returns `true` for a rate-limit failure that exhausted its retries.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AssemblyError::Api(err) if err.is_rate_limited())
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, AssemblyError::Precondition(_))
    }
}

impl From<StreamError> for AssemblyError {
    fn from(err: StreamError) -> Self {
        AssemblyError::Stream(err)
    }
}

impl From<TransferError> for AssemblyError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Stream(e) => AssemblyError::Stream(e),
            TransferError::InvalidSource(msg) | TransferError::InvalidLabel(msg) => {
                AssemblyError::Precondition(msg)
            }
            other => AssemblyError::Transfer(other),
        }
    }
}

impl From<ConfigError> for AssemblyError {
    fn from(err: ConfigError) -> Self {
        AssemblyError::Precondition(err.to_string())
    }
}
