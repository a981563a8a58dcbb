//! Bounded-concurrency resumable uploads with coalesced progress.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::chunked::ChunkReader;
use crate::observer::StreamErrorSink;
use crate::progress::{ProgressAggregator, ProgressCallback, track_progress};
use crate::tus::{ChunkTransport, PatchRequest, UploadMetadata};
use crate::types::{ChunkSize, ResolvedStream};
use crate::TransferError;

/// Where uploads go, as returned by the assembly create-call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Resumable upload base endpoint.
    pub tus_url: String,
    /// Canonical assembly URL, embedded in every upload's metadata.
    pub assembly_url: String,
}

/// Coordinator tuning.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    /// Maximum uploads in flight; values below 1 are treated as 1.
    pub concurrency: usize,
    pub chunk_size: ChunkSize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            concurrency: 10,
            chunk_size: ChunkSize::Unbounded,
        }
    }
}

/// State shared by the upload tasks of one submission.
struct UploadContext {
    transport: Arc<dyn ChunkTransport>,
    progress: Arc<ProgressAggregator>,
    target: UploadTarget,
    chunk_size: ChunkSize,
    sink: StreamErrorSink,
}

/// Uploads every stream of a submission through the resumable transport.
///
/// The first failing upload fails the coordinator. Uploads already in
/// flight keep running; their results are discarded.
pub struct StreamUploadCoordinator {
    transport: Arc<dyn ChunkTransport>,
    streams: Vec<Arc<ResolvedStream>>,
    progress: Arc<ProgressAggregator>,
    options: CoordinatorOptions,
}

impl StreamUploadCoordinator {
    pub fn new(
        transport: Arc<dyn ChunkTransport>,
        streams: Vec<Arc<ResolvedStream>>,
        options: CoordinatorOptions,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        let progress = Arc::new(ProgressAggregator::new(
            streams.iter().map(|s| s.size()),
            on_progress,
        ));
        Self {
            transport,
            streams,
            progress,
            options,
        }
    }

    /// Precomputed total, `None` if any stream's size is unknown.
    pub fn total_bytes(&self) -> Option<u64> {
        self.progress.total_bytes()
    }

    pub fn progress(&self) -> &ProgressAggregator {
        &self.progress
    }

    /// Runs all uploads. Returns once every upload has finished, or with
    /// the first failure.
    pub async fn run(
        &self,
        target: UploadTarget,
        sink: StreamErrorSink,
    ) -> Result<(), TransferError> {
        if target.tus_url.is_empty() {
            return Err(TransferError::MissingEndpoint);
        }

        let total = self.streams.len();
        if total == 0 {
            return Ok(());
        }

        let concurrency = self.options.concurrency.max(1);
        info!(
            streams = total,
            concurrency,
            total_bytes = ?self.total_bytes(),
            "starting resumable uploads"
        );

        let ctx = Arc::new(UploadContext {
            transport: Arc::clone(&self.transport),
            progress: Arc::clone(&self.progress),
            target,
            chunk_size: self.options.chunk_size,
            sink,
        });
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let (tx, mut rx) = mpsc::channel(total);

        let mut queue = self.streams.iter();
        let mut next = queue.next();
        let mut finished = 0;

        while finished < total {
            tokio::select! {
                biased;
                Some((label, outcome)) = rx.recv() => {
                    finished += 1;
                    if let Err(e) = outcome {
                        debug!(label = %label, error = %e, "upload failed, abandoning the rest");
                        return Err(e);
                    }
                    debug!(label = %label, finished, total, "upload finished");
                }
                permit = Arc::clone(&semaphore).acquire_owned(), if next.is_some() => {
                    let (Ok(permit), Some(stream)) = (permit, next.take()) else {
                        break;
                    };
                    let ctx = Arc::clone(&ctx);
                    let stream = Arc::clone(stream);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let label = stream.label().to_string();
                        let outcome = upload_one(&ctx, &stream).await;
                        drop(permit);
                        // The receiver is gone once another upload failed.
                        let _ = tx.send((label, outcome)).await;
                    });
                    next = queue.next();
                }
                else => break,
            }
        }

        if finished < total {
            return Err(TransferError::Task("upload scheduling stopped early".into()));
        }
        info!(uploaded_bytes = self.progress.uploaded_bytes(), "resumable uploads finished");
        Ok(())
    }
}

/// Uploads one stream: create, then append until the source is drained.
async fn upload_one(ctx: &UploadContext, stream: &ResolvedStream) -> Result<(), TransferError> {
    let label = stream.label().to_string();
    let length = stream.size();
    let metadata = UploadMetadata {
        assembly_url: ctx.target.assembly_url.clone(),
        fieldname: label.clone(),
        filename: stream.filename(),
    };

    let reader = stream.open(&ctx.sink).await?;
    let location = ctx
        .transport
        .create(&ctx.target.tus_url, &metadata, length)
        .await?;
    debug!(label = %label, location = %location, length = ?length, "upload created");

    let Some(chunk_size) = ctx.chunk_size.effective(length) else {
        // Known length, unbounded chunks: the whole stream in one request.
        let len = length.unwrap_or_default();
        if len == 0 {
            return Ok(());
        }
        let body = track_progress(
            ReaderStream::new(reader),
            label.clone(),
            0,
            Arc::clone(&ctx.progress),
        );
        let confirmed = ctx
            .transport
            .patch(
                &location,
                PatchRequest {
                    offset: 0,
                    len,
                    body,
                    upload_length: None,
                },
            )
            .await?;
        check_offset(len, confirmed)?;
        ctx.progress.record(&label, confirmed);
        return Ok(());
    };

    if length == Some(0) {
        return Ok(());
    }

    let deferred = length.is_none();
    let mut chunks = ChunkReader::new(reader, chunk_size);
    let mut offset = 0u64;
    loop {
        let chunk = chunks.next_chunk().await?;
        let (data, last) = match chunk {
            Some(c) => (c.data, c.last),
            // Known lengths end on their final full chunk. Deferred ones
            // still have to announce their length.
            None if deferred => (Bytes::new(), true),
            None => break,
        };

        let len = data.len() as u64;
        let upload_length = (deferred && last).then_some(offset + len);
        let body = track_progress(
            futures_util::stream::once(async move { Ok(data) }),
            label.clone(),
            offset,
            Arc::clone(&ctx.progress),
        );
        let confirmed = ctx
            .transport
            .patch(
                &location,
                PatchRequest {
                    offset,
                    len,
                    body,
                    upload_length,
                },
            )
            .await?;
        check_offset(offset + len, confirmed)?;
        offset = confirmed;
        ctx.progress.record(&label, offset);

        if last || length.is_some_and(|l| offset >= l) {
            break;
        }
    }
    Ok(())
}

fn check_offset(expected: u64, actual: u64) -> Result<(), TransferError> {
    if expected != actual {
        return Err(TransferError::OffsetMismatch { expected, actual });
    }
    Ok(())
}
