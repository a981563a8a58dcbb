//! Waiting for an assembly to leave its busy states.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use transloadit_protocol::AssemblyStatus;

use crate::error::AssemblyError;
use crate::types::AssemblyProgressCallback;

/// Re-fetches an assembly's status at a fixed interval until it is no
/// longer busy.
#[derive(Debug, Clone, Copy)]
pub struct CompletionPoller {
    interval: Duration,
}

impl Default for CompletionPoller {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl CompletionPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls `fetch` until it returns a non-busy status, which is returned
    /// as-is (terminal errors included; the caller decides what they mean).
    ///
    /// The timeout budget counts from `started`, so time spent before
    /// polling began is charged against it. Every busy snapshot is passed
    /// to `on_progress`; callback failures are logged and ignored.
    pub async fn poll<F, Fut>(
        &self,
        assembly_id: &str,
        mut fetch: F,
        started: Instant,
        timeout: Option<Duration>,
        on_progress: Option<&AssemblyProgressCallback>,
    ) -> Result<AssemblyStatus, AssemblyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AssemblyStatus, AssemblyError>>,
    {
        let mut polls = 0u32;
        loop {
            let status = fetch().await?;
            polls += 1;

            let state = status.state();
            if !state.is_busy() {
                debug!(assembly_id, polls, ?state, "assembly settled");
                return Ok(status);
            }

            if let Some(callback) = on_progress
                && let Err(e) = callback(&status)
            {
                warn!(assembly_id, error = %e, "assembly progress callback failed");
            }

            if let Some(timeout) = timeout
                && started.elapsed() >= timeout
            {
                return Err(AssemblyError::PollingTimeout {
                    assembly_id: assembly_id.to_string(),
                    timeout,
                });
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
