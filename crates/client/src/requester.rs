//! API calls with admission-control retries.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::warn;

use transloadit_protocol::constants::MAX_RETRY_DELAY;

use crate::error::{ApiError, AssemblyError};
use crate::http::{ApiRequest, ApiResponse, HttpTransport};

/// Result of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Value),
    /// Rate limited; retry after the given delay.
    Retryable(Duration),
    Terminal(AssemblyError),
}

/// Sends API calls and retries the ones rejected by rate limiting.
///
/// Only the rate-limit signal (HTTP 413, `RATE_LIMIT_REACHED`, a usable
/// `info.retryIn`) is retried; every other failure surfaces immediately.
#[derive(Clone)]
pub struct RateLimitedRequester {
    transport: Arc<dyn HttpTransport>,
    max_retries: u32,
}

impl RateLimitedRequester {
    pub fn new(transport: Arc<dyn HttpTransport>, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Executes `request`, returning the JSON body of the first successful
    /// attempt.
    ///
    /// At most `max_retries + 1` attempts are made. Each attempt rebuilds
    /// its body from the request's stream handles.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, AssemblyError> {
        let mut retries = 0u32;
        loop {
            let result = self.transport.send(request).await;
            match classify(result, retries < self.max_retries) {
                AttemptOutcome::Success(body) => return Ok(body),
                AttemptOutcome::Terminal(err) => return Err(err),
                AttemptOutcome::Retryable(delay) => {
                    retries += 1;
                    warn!(
                        url = %request.url,
                        attempt = retries,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Classifies one attempt. `may_retry` is `false` once the retry budget is
/// spent.
pub fn classify(result: Result<ApiResponse, AssemblyError>, may_retry: bool) -> AttemptOutcome {
    let response = match result {
        Ok(response) => response,
        Err(err) => return AttemptOutcome::Terminal(err),
    };

    if response.is_success() {
        return AttemptOutcome::Success(response.body);
    }

    let err = ApiError::from_body(&response.body, Some(response.status));
    match err.retry_in {
        Some(seconds) if may_retry && err.is_rate_limited() => {
            AttemptOutcome::Retryable(jittered(seconds))
        }
        _ => AttemptOutcome::Terminal(AssemblyError::api(err)),
    }
}

/// `seconds` scaled by a random factor in [0.9, 1.1], capped at
/// [`MAX_RETRY_DELAY`].
fn jittered(seconds: f64) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::try_from_secs_f64((seconds * factor).max(0.0))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}
