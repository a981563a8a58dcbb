//! In-memory transports shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::StreamExt;
use reqwest::Method;
use serde_json::Value;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;

use transloadit_transfer::{
    ByteStream, ChunkTransport, PatchRequest, StreamErrorObserver, TransferError, UploadMetadata,
    track_progress,
};

use crate::config::ClientConfig;
use crate::error::AssemblyError;
use crate::http::{ApiRequest, ApiResponse, HttpTransport};

pub const ENDPOINT: &str = "http://api.test";

pub fn config() -> ClientConfig {
    ClientConfig::new("test-key", "test-secret").with_endpoint(ENDPOINT)
}

pub fn ok(body: Value) -> ApiResponse {
    ApiResponse { status: 200, body }
}

/// What the API mock saw of one attempt.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub fields: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub streams: Vec<String>,
}

impl RecordedCall {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted API: responses are queued per method, the last one repeats.
/// Inline streams are drained the way a real transport would, and a read
/// failure leaves the call hanging.
#[derive(Default)]
pub struct MockApi {
    responses: Mutex<HashMap<Method, VecDeque<ApiResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: Method, responses: Vec<ApiResponse>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(method, responses.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_response(&self, method: &Method) -> ApiResponse {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(method)
            .unwrap_or_else(|| panic!("no response scripted for {method}"));
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

impl HttpTransport for MockApi {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, AssemblyError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                method: request.method.clone(),
                url: request.url.clone(),
                fields: request.fields.clone(),
                query: request.query.clone(),
                streams: request
                    .streams
                    .iter()
                    .map(|s| s.label().to_string())
                    .collect(),
            });

            let fallback = StreamErrorObserver::new();
            let sink = request.sink.clone().unwrap_or_else(|| fallback.sink());
            for stream in &request.streams {
                let reader = stream.open(&sink).await?;
                let mut body: ByteStream = match &request.progress {
                    Some(progress) => track_progress(
                        ReaderStream::new(reader),
                        stream.label().to_string(),
                        0,
                        Arc::clone(progress),
                    ),
                    None => Box::pin(ReaderStream::new(reader)),
                };
                while let Some(item) = body.next().await {
                    if item.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }

            Ok(self.next_response(&request.method))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    Create {
        fieldname: String,
        filename: String,
        assembly_url: String,
        length: Option<u64>,
    },
    Patch {
        location: String,
        offset: u64,
        len: u64,
    },
}

/// Resumable transport that accepts everything and records the traffic.
#[derive(Default)]
pub struct MockChunks {
    events: Mutex<Vec<ChunkEvent>>,
}

impl MockChunks {
    pub fn events(&self) -> Vec<ChunkEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ChunkTransport for MockChunks {
    fn create(
        &self,
        endpoint: &str,
        metadata: &UploadMetadata,
        length: Option<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransferError>> + Send + '_>> {
        let location = format!("{endpoint}/files/{}", metadata.fieldname);
        self.events.lock().unwrap().push(ChunkEvent::Create {
            fieldname: metadata.fieldname.clone(),
            filename: metadata.filename.clone(),
            assembly_url: metadata.assembly_url.clone(),
            length,
        });
        Box::pin(async move { Ok(location) })
    }

    fn patch(
        &self,
        location: &str,
        request: PatchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u64, TransferError>> + Send + '_>> {
        let location = location.to_string();
        Box::pin(async move {
            let PatchRequest {
                offset, mut body, ..
            } = request;
            let mut len = 0u64;
            while let Some(bytes) = body.next().await {
                len += bytes?.len() as u64;
                tokio::task::yield_now().await;
            }
            self.events.lock().unwrap().push(ChunkEvent::Patch {
                location,
                offset,
                len,
            });
            Ok(offset + len)
        })
    }
}

/// Reader that fails on its first read.
pub struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away")))
    }
}
