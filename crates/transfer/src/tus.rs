//! Resumable (tus 1.0.0) chunk transport.
//!
//! A transfer is a creation request against the endpoint the assembly
//! returned, followed by one or more `PATCH` requests that append bytes at
//! the server-confirmed offset.

use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use tracing::debug;

use transloadit_protocol::constants::TUS_VERSION;

use crate::{ByteStream, TransferError};

const TUS_RESUMABLE: &str = "tus-resumable";
const UPLOAD_LENGTH: &str = "upload-length";
const UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";
const UPLOAD_METADATA: &str = "upload-metadata";
const UPLOAD_OFFSET: &str = "upload-offset";
const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Metadata attached to every resumable upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// Canonical URL of the assembly the upload belongs to.
    pub assembly_url: String,
    /// Stream label; becomes the form field name on the server side.
    pub fieldname: String,
    pub filename: String,
}

impl UploadMetadata {
    /// Encodes as an `Upload-Metadata` header value.
    pub fn encode(&self) -> String {
        [
            ("assembly_url", &self.assembly_url),
            ("fieldname", &self.fieldname),
            ("filename", &self.filename),
        ]
        .iter()
        .map(|(k, v)| format!("{k} {}", STANDARD.encode(v.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// One append request.
pub struct PatchRequest {
    /// Offset the body starts at.
    pub offset: u64,
    /// Exact number of bytes `body` yields.
    pub len: u64,
    pub body: ByteStream,
    /// Declares the final length of a deferred-length upload.
    pub upload_length: Option<u64>,
}

/// Abstract resumable upload transport.
///
/// [`TusTransport`] talks HTTP; tests substitute in-memory mocks.
pub trait ChunkTransport: Send + Sync {
    /// Creates an upload and returns its absolute location.
    ///
    /// `length` of `None` requests a deferred-length upload.
    fn create(
        &self,
        endpoint: &str,
        metadata: &UploadMetadata,
        length: Option<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransferError>> + Send + '_>>;

    /// Appends bytes and returns the server's new offset.
    fn patch(
        &self,
        location: &str,
        request: PatchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u64, TransferError>> + Send + '_>>;
}

/// HTTP implementation of [`ChunkTransport`].
#[derive(Clone)]
pub struct TusTransport {
    http: reqwest::Client,
    headers: HeaderMap,
}

impl TusTransport {
    /// Creates a transport that sends `headers` (e.g. the client
    /// identification header) on every request.
    pub fn new(http: reqwest::Client, headers: HeaderMap) -> Self {
        Self { http, headers }
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static(TUS_RESUMABLE),
            HeaderValue::from_static(TUS_VERSION),
        );
        headers
    }
}

async fn server_error(resp: reqwest::Response) -> TransferError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    TransferError::Server { status, body }
}

impl ChunkTransport for TusTransport {
    fn create(
        &self,
        endpoint: &str,
        metadata: &UploadMetadata,
        length: Option<u64>,
    ) -> Pin<Box<dyn Future<Output = Result<String, TransferError>> + Send + '_>> {
        let endpoint = endpoint.to_string();
        let encoded = metadata.encode();
        Box::pin(async move {
            let mut headers = self.base_headers();
            match length {
                Some(len) => {
                    headers.insert(HeaderName::from_static(UPLOAD_LENGTH), len.into());
                }
                None => {
                    headers.insert(
                        HeaderName::from_static(UPLOAD_DEFER_LENGTH),
                        HeaderValue::from_static("1"),
                    );
                }
            }
            let meta = HeaderValue::from_str(&encoded)
                .map_err(|e| TransferError::InvalidSource(format!("upload metadata: {e}")))?;
            headers.insert(HeaderName::from_static(UPLOAD_METADATA), meta);
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));

            let resp = self.http.post(&endpoint).headers(headers).send().await?;
            if !resp.status().is_success() {
                return Err(server_error(resp).await);
            }

            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(TransferError::MissingLocation)?;
            let base = reqwest::Url::parse(&endpoint)
                .map_err(|e| TransferError::InvalidSource(format!("upload endpoint: {e}")))?;
            let absolute = base
                .join(location)
                .map_err(|_| TransferError::MissingLocation)?;

            debug!(location = %absolute, "resumable upload created");
            Ok(absolute.to_string())
        })
    }

    fn patch(
        &self,
        location: &str,
        request: PatchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u64, TransferError>> + Send + '_>> {
        let location = location.to_string();
        Box::pin(async move {
            let mut headers = self.base_headers();
            headers.insert(HeaderName::from_static(UPLOAD_OFFSET), request.offset.into());
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(OFFSET_OCTET_STREAM));
            headers.insert(CONTENT_LENGTH, request.len.into());
            if let Some(total) = request.upload_length {
                headers.insert(HeaderName::from_static(UPLOAD_LENGTH), total.into());
            }

            let resp = self
                .http
                .patch(&location)
                .headers(headers)
                .body(reqwest::Body::wrap_stream(request.body))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(server_error(resp).await);
            }

            resp.headers()
                .get(UPLOAD_OFFSET)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or(TransferError::MissingOffset)
        })
    }
}
