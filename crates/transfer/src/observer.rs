//! Fail-fast reporting of input stream read errors.
//!
//! Every reader handed to a transport is wrapped in an [`ObservedReader`].
//! The first read error is pushed to the submission's
//! [`StreamErrorObserver`], which the submitter races against the upload
//! flow so a broken input aborts the whole submission at once.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::BoxReader;

/// An input source failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream `{label}` failed: {message}")]
    Read {
        label: String,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("stream `{label}` was already consumed")]
    Consumed { label: String },
}

impl StreamError {
    pub(crate) fn read(label: &str, err: &io::Error) -> Self {
        StreamError::Read {
            label: label.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            StreamError::Read { label, .. } | StreamError::Consumed { label } => label,
        }
    }
}

/// Sending half handed to every reader of one submission.
#[derive(Debug, Clone)]
pub struct StreamErrorSink {
    tx: mpsc::UnboundedSender<StreamError>,
}

impl StreamErrorSink {
    /// Reports an error. Ignored once the observer is gone.
    pub fn report(&self, err: StreamError) {
        warn!(label = %err.label(), error = %err, "input stream failed");
        let _ = self.tx.send(err);
    }
}

/// Receives the first stream error of a submission.
#[derive(Debug)]
pub struct StreamErrorObserver {
    tx: mpsc::UnboundedSender<StreamError>,
    rx: mpsc::UnboundedReceiver<StreamError>,
}

impl Default for StreamErrorObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamErrorObserver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sink(&self) -> StreamErrorSink {
        StreamErrorSink {
            tx: self.tx.clone(),
        }
    }

    /// Resolves with the first reported error; pends forever otherwise.
    pub async fn first_error(&mut self) -> StreamError {
        match self.rx.recv().await {
            Some(err) => err,
            None => std::future::pending().await,
        }
    }
}

/// Reader that reports its first failure to a [`StreamErrorSink`].
pub struct ObservedReader {
    label: String,
    inner: BoxReader,
    sink: StreamErrorSink,
    failed: bool,
}

impl ObservedReader {
    pub(crate) fn new(label: String, inner: BoxReader, sink: StreamErrorSink) -> Self {
        Self {
            label,
            inner,
            sink,
            failed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for ObservedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedReader")
            .field("label", &self.label)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for ObservedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let poll = this.inner.as_mut().poll_read(cx, buf);
        if let Poll::Ready(Err(err)) = &poll
            && !this.failed
        {
            this.failed = true;
            this.sink.report(StreamError::read(&this.label, err));
        }
        poll
    }
}
