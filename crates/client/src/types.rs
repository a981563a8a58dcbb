use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use transloadit_protocol::AssemblyStatus;
use transloadit_transfer::{ChunkSize, ProgressCallback, StreamHandle, UploadProgress};

/// Error a caller callback may return. It is logged and otherwise ignored.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked with every busy snapshot while waiting for completion.
pub type AssemblyProgressCallback =
    Arc<dyn Fn(&AssemblyStatus) -> Result<(), CallbackError> + Send + Sync>;

/// Invoked once with the assembly id, before any network activity.
pub type AssemblyIdCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything needed to submit one assembly.
///
/// Built with chained setters:
///
/// ```no_run
/// # use transloadit_client::{AssemblyRequest, StreamHandle};
/// let request = AssemblyRequest::new(serde_json::json!({"template_id": "abc"}))
///     .add_stream(StreamHandle::file("video", "/tmp/clip.mp4"))
///     .wait_for_completion(true);
/// ```
pub struct AssemblyRequest {
    pub(crate) params: Value,
    pub(crate) fields: Vec<(String, String)>,
    pub(crate) streams: Vec<StreamHandle>,
    pub(crate) resumable: bool,
    pub(crate) concurrency: usize,
    pub(crate) chunk_size: ChunkSize,
    pub(crate) wait_for_completion: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) assembly_id: Option<String>,
    pub(crate) on_assembly_id: Option<AssemblyIdCallback>,
    pub(crate) on_upload_progress: Option<ProgressCallback>,
    pub(crate) on_assembly_progress: Option<AssemblyProgressCallback>,
}

impl AssemblyRequest {
    /// Creates a request with the given assembly parameters.
    ///
    /// Defaults: resumable uploads, concurrency 10, unbounded chunks, no
    /// waiting.
    pub fn new(params: Value) -> Self {
        Self {
            params,
            fields: Vec::new(),
            streams: Vec::new(),
            resumable: true,
            concurrency: transloadit_transfer::CoordinatorOptions::default().concurrency,
            chunk_size: ChunkSize::default(),
            wait_for_completion: false,
            timeout: None,
            assembly_id: None,
            on_assembly_id: None,
            on_upload_progress: None,
            on_assembly_progress: None,
        }
    }

    /// Adds an extra form field to the create-call.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Adds a local file, labelled `label`.
    pub fn add_file(self, label: impl Into<String>, path: impl Into<std::path::PathBuf>) -> Self {
        self.add_stream(StreamHandle::file(label, path))
    }

    pub fn add_stream(mut self, stream: StreamHandle) -> Self {
        self.streams.push(stream);
        self
    }

    /// Prefer resumable uploads (the default) over inline multipart.
    pub fn resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    /// Maximum simultaneous resumable uploads. Values below 1 are raised to 1.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn chunk_size(mut self, chunk_size: ChunkSize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    /// Completion wait budget, measured from the start of the submission.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a caller-chosen assembly id instead of a generated one.
    pub fn assembly_id(mut self, id: impl Into<String>) -> Self {
        self.assembly_id = Some(id.into());
        self
    }

    pub fn on_assembly_id<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_assembly_id = Some(Arc::new(callback));
        self
    }

    pub fn on_upload_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        self.on_upload_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_assembly_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AssemblyStatus) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_assembly_progress = Some(Arc::new(callback));
        self
    }
}

/// Options for waiting on an existing assembly.
#[derive(Clone, Default)]
pub struct AwaitOptions {
    /// Total wait budget; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub on_assembly_progress: Option<AssemblyProgressCallback>,
}

impl AwaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_assembly_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AssemblyStatus) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.on_assembly_progress = Some(Arc::new(callback));
        self
    }
}
