use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use tokio::io::AsyncRead;

use crate::observer::{ObservedReader, StreamError, StreamErrorSink};
use crate::{TransferError, validate_labels};

/// Boxed one-shot byte source.
pub type BoxReader = Pin<Box<dyn AsyncRead + Send>>;

/// Where the bytes of an input stream come from.
///
/// Decided once when the caller builds the request; nothing downstream
/// inspects the reader to guess what kind of source it is.
pub enum StreamSource {
    /// A local file. Its size is probed before any transfer starts and it
    /// can be reopened for every attempt.
    File(PathBuf),
    /// An arbitrary reader. Readable exactly once; `size` is optional.
    Generic {
        reader: Mutex<Option<BoxReader>>,
        size: Option<u64>,
    },
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::File(path) => f.debug_tuple("File").field(path).finish(),
            StreamSource::Generic { size, .. } => {
                f.debug_struct("Generic").field("size", size).finish()
            }
        }
    }
}

/// A named input stream supplied by the caller.
#[derive(Debug)]
pub struct StreamHandle {
    label: String,
    source: StreamSource,
}

impl StreamHandle {
    /// Creates a file-backed stream.
    pub fn file(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            source: StreamSource::File(path.into()),
        }
    }

    /// Creates a stream over an arbitrary reader.
    pub fn generic<R>(label: impl Into<String>, reader: R, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            label: label.into(),
            source: StreamSource::Generic {
                reader: Mutex::new(Some(Box::pin(reader))),
                size,
            },
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &StreamSource {
        &self.source
    }

    pub fn is_file(&self) -> bool {
        matches!(self.source, StreamSource::File(_))
    }

    /// Filename announced to the server: the file's basename, or the label
    /// for generic streams.
    pub fn filename(&self) -> String {
        match &self.source {
            StreamSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.label.clone()),
            StreamSource::Generic { .. } => self.label.clone(),
        }
    }

    /// Probes the size of the stream.
    ///
    /// File-backed streams must be readable regular files; generic streams
    /// keep whatever size the caller supplied.
    pub async fn resolve(self) -> Result<ResolvedStream, TransferError> {
        let size = match &self.source {
            StreamSource::File(path) => Some(probe_file(path).await?),
            StreamSource::Generic { size, .. } => *size,
        };
        Ok(ResolvedStream { handle: self, size })
    }
}

async fn probe_file(path: &Path) -> Result<u64, TransferError> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        TransferError::InvalidSource(format!("{}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(TransferError::InvalidSource(format!(
            "{}: not a regular file",
            path.display()
        )));
    }
    Ok(meta.len())
}

/// Validates labels and probes every stream's size, in order.
pub async fn resolve_streams(
    handles: Vec<StreamHandle>,
) -> Result<Vec<ResolvedStream>, TransferError> {
    validate_labels(handles.iter().map(StreamHandle::label))?;
    let mut resolved = Vec::with_capacity(handles.len());
    for handle in handles {
        resolved.push(handle.resolve().await?);
    }
    Ok(resolved)
}

/// A stream whose size has been probed.
#[derive(Debug)]
pub struct ResolvedStream {
    handle: StreamHandle,
    size: Option<u64>,
}

impl ResolvedStream {
    pub fn label(&self) -> &str {
        self.handle.label()
    }

    pub fn filename(&self) -> String {
        self.handle.filename()
    }

    /// Byte length, `None` when unknown.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn is_file(&self) -> bool {
        self.handle.is_file()
    }

    /// Opens the byte source for reading. Read failures are reported to
    /// `sink` as they happen.
    ///
    /// Files are reopened on every call; generic readers can be taken once.
    pub async fn open(&self, sink: &StreamErrorSink) -> Result<ObservedReader, StreamError> {
        let label = self.label().to_string();
        let reader: BoxReader = match &self.handle.source {
            StreamSource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    let err = StreamError::read(&label, &e);
                    sink.report(err.clone());
                    err
                })?;
                Box::pin(file)
            }
            StreamSource::Generic { reader, .. } => {
                take_reader(reader).ok_or_else(|| StreamError::Consumed {
                    label: label.clone(),
                })?
            }
        };
        Ok(ObservedReader::new(label, reader, sink.clone()))
    }
}

fn take_reader(slot: &Mutex<Option<BoxReader>>) -> Option<BoxReader> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Chunk-size preference for the resumable transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkSize {
    /// One request per stream when the length is known.
    #[default]
    Unbounded,
    Bytes(usize),
}

impl ChunkSize {
    /// Chunk size to use for a stream of the given length; `None` means the
    /// whole stream goes in a single request.
    pub fn effective(&self, length: Option<u64>) -> Option<usize> {
        match (self, length) {
            (ChunkSize::Bytes(0), _) => Some(crate::DEFAULT_CHUNK_SIZE),
            (ChunkSize::Bytes(n), _) => Some(*n),
            (ChunkSize::Unbounded, Some(_)) => None,
            (ChunkSize::Unbounded, None) => Some(crate::DEFERRED_CHUNK_SIZE),
        }
    }
}
