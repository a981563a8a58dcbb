//! Input streams, resumable chunk transport and upload coordination.
//!
//! The [`StreamUploadCoordinator`] drives one resumable upload per input
//! stream with bounded concurrency and folds every per-stream byte cursor
//! into a single monotone progress signal.

mod chunked;
mod coordinator;
mod observer;
mod progress;
mod tus;
mod types;
mod validation;

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

pub use chunked::{Chunk, ChunkReader};
pub use coordinator::{CoordinatorOptions, StreamUploadCoordinator, UploadTarget};
pub use observer::{ObservedReader, StreamError, StreamErrorObserver, StreamErrorSink};
pub use progress::{ProgressAggregator, ProgressCallback, UploadProgress, track_progress};
pub use tus::{ChunkTransport, PatchRequest, TusTransport, UploadMetadata};
pub use types::{ChunkSize, ResolvedStream, StreamHandle, StreamSource, resolve_streams};
pub use validation::validate_labels;

/// Default chunk size for bounded chunking: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Chunk size used for deferred-length uploads when the caller asked for
/// unbounded chunks. Deferred-length transfers need a finite chunk size.
pub const DEFERRED_CHUNK_SIZE: usize = 50_000_000;

/// Body of a single transfer request.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("upload server did not return a Location header")]
    MissingLocation,

    #[error("upload server did not return an Upload-Offset header")]
    MissingOffset,

    #[error("no resumable upload endpoint available")]
    MissingEndpoint,

    #[error("upload offset mismatch: expected {expected}, server reported {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("invalid input source: {0}")]
    InvalidSource(String),

    #[error("invalid stream label: {0}")]
    InvalidLabel(String),

    #[error("upload task failed: {0}")]
    Task(String),
}
