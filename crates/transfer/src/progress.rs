use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::ByteStream;

/// Coalesced upload progress of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub uploaded_bytes: u64,
    /// Sum of all stream sizes; `None` if any stream's size is unknown.
    pub total_bytes: Option<u64>,
}

/// Callback invoked with upload progress.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Folds per-stream byte cursors into one monotone progress signal.
///
/// One aggregator belongs to exactly one submission. Events are forwarded
/// only when the aggregate strictly grows, so callers never see a repeated
/// or decreasing value.
pub struct ProgressAggregator {
    total: Option<u64>,
    callback: Option<ProgressCallback>,
    inner: Mutex<AggregatorInner>,
}

#[derive(Default)]
struct AggregatorInner {
    cursors: HashMap<String, u64>,
    last_emitted: u64,
}

impl ProgressAggregator {
    /// Creates an aggregator. `sizes` holds one entry per stream; a single
    /// `None` makes the total unknown.
    pub fn new<I>(sizes: I, callback: Option<ProgressCallback>) -> Self
    where
        I: IntoIterator<Item = Option<u64>>,
    {
        let total = sizes
            .into_iter()
            .try_fold(0u64, |acc, size| size.map(|s| acc.saturating_add(s)));
        Self {
            total,
            callback,
            inner: Mutex::new(AggregatorInner::default()),
        }
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    /// Sum of all cursors.
    pub fn uploaded_bytes(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.cursors.values().sum()
    }

    /// Records that `label` has transferred `transferred` bytes in total.
    ///
    /// Cursors only move forward. Returns the event forwarded to the
    /// callback, if the aggregate grew.
    pub fn record(&self, label: &str, transferred: u64) -> Option<UploadProgress> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let cursor = inner.cursors.entry(label.to_string()).or_insert(0);
        if transferred <= *cursor {
            return None;
        }
        *cursor = transferred;

        let sum: u64 = inner.cursors.values().sum();
        let uploaded = match self.total {
            Some(total) => sum.min(total),
            None => sum,
        };
        if uploaded <= inner.last_emitted {
            return None;
        }
        inner.last_emitted = uploaded;

        let progress = UploadProgress {
            uploaded_bytes: uploaded,
            total_bytes: self.total,
        };
        // Invoked under the lock so concurrent streams cannot reorder events.
        if let Some(cb) = &self.callback {
            cb(progress);
        }
        Some(progress)
    }
}

/// Wraps a body stream so every yielded buffer advances `label`'s cursor,
/// starting from `base`.
pub fn track_progress<S>(
    stream: S,
    label: String,
    base: u64,
    progress: Arc<ProgressAggregator>,
) -> ByteStream
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let mut sent = base;
    Box::pin(stream.inspect(move |item| {
        if let Ok(bytes) = item {
            sent += bytes.len() as u64;
            progress.record(&label, sent);
        }
    }))
}
