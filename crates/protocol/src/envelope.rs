//! Error side of the JSON response envelope.
//!
//! Every API response is a JSON object. Successful ones carry an `ok`
//! token, failed ones an `error` token plus a human-readable `message`.
//! Rate-limit failures add `info.retryIn` (seconds).

use serde::{Deserialize, Serialize};

use crate::constants::{RATE_LIMIT_ERROR, RATE_LIMIT_STATUS};

/// Extra machine-readable details attached to an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in: Option<f64>,
}

/// The fields of a response body that describe a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_ssl_url: Option<String>,
}

impl ErrorEnvelope {
    /// Extracts the error fields from an arbitrary response body.
    ///
    /// Bodies that are not JSON objects yield an empty envelope.
    pub fn from_body(body: &serde_json::Value) -> Self {
        serde_json::from_value(body.clone()).unwrap_or_default()
    }

    /// Server-suggested retry delay in seconds, if any.
    pub fn retry_in(&self) -> Option<f64> {
        self.info.as_ref().and_then(|i| i.retry_in)
    }

    /// Returns `true` for the status/token combination that signals admission
    /// control, with a usable retry delay.
    pub fn is_rate_limited(&self, http_status: u16) -> bool {
        http_status == RATE_LIMIT_STATUS
            && self.error.as_deref() == Some(RATE_LIMIT_ERROR)
            && self.retry_in().is_some_and(|s| s.is_finite() && s >= 0.0)
    }
}
