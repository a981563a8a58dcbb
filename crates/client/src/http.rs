//! Signed API calls over HTTP.
//!
//! Reads carry the signed parameters in the query string; mutating calls
//! send them as multipart form fields, followed by any inline streams.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::debug;

use transloadit_protocol::constants::CLIENT_HEADER;
use transloadit_transfer::{
    ByteStream, ProgressAggregator, ResolvedStream, StreamErrorObserver, StreamErrorSink,
    track_progress,
};

use crate::config::ClientConfig;
use crate::error::AssemblyError;
use crate::signer::SignedPayload;

/// A fully described API call. Bodies are rebuilt from it on every attempt.
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Multipart text fields, in order.
    pub fields: Vec<(String, String)>,
    /// Streams sent inline as multipart file parts.
    pub streams: Vec<Arc<ResolvedStream>>,
    pub sink: Option<StreamErrorSink>,
    pub progress: Option<Arc<ProgressAggregator>>,
}

impl ApiRequest {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            fields: Vec::new(),
            streams: Vec::new(),
            sink: None,
            progress: None,
        }
    }

    /// A call whose signed parameters travel in the query string.
    pub fn signed_query(method: Method, url: impl Into<String>, signed: &SignedPayload) -> Self {
        let mut request = Self::new(method, url);
        request.query = vec![
            ("signature".into(), signed.signature.clone()),
            ("params".into(), signed.params.clone()),
        ];
        request
    }

    /// A multipart call: `params`, `signature`, then `extra` fields.
    pub fn signed_form(
        method: Method,
        url: impl Into<String>,
        signed: &SignedPayload,
        extra: Vec<(String, String)>,
    ) -> Self {
        let mut request = Self::new(method, url);
        request.fields = vec![
            ("params".into(), signed.params.clone()),
            ("signature".into(), signed.signature.clone()),
        ];
        request.fields.extend(extra);
        request
    }

    /// Attaches inline streams. Read failures go to `sink`, transferred
    /// bytes to `progress`.
    pub fn with_streams(
        mut self,
        streams: Vec<Arc<ResolvedStream>>,
        sink: StreamErrorSink,
        progress: Option<Arc<ProgressAggregator>>,
    ) -> Self {
        self.streams = streams;
        self.sink = Some(sink);
        self.progress = progress;
        self
    }

    pub fn is_multipart(&self) -> bool {
        !self.fields.is_empty() || !self.streams.is_empty()
    }
}

/// Status and parsed body of an API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// The JSON body, or the raw text as a string value if it was not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one attempt of an [`ApiRequest`].
///
/// [`ReqwestTransport`] talks HTTP; tests substitute scripted mocks.
pub trait HttpTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, AssemblyError>> + Send + 'a>>;
}

/// Builds the shared HTTP client: client-identification header on every
/// call, no default user-agent.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, AssemblyError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&config.client_header_value())
        .map_err(|e| AssemblyError::Precondition(format!("client name: {e}")))?;
    let name = HeaderName::from_bytes(CLIENT_HEADER.as_bytes())
        .map_err(|e| AssemblyError::Precondition(format!("client header: {e}")))?;
    headers.insert(name, value);

    let http = reqwest::Client::builder()
        .default_headers(headers)
        .build()?;
    Ok(http)
}

/// HTTP implementation of [`HttpTransport`].
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn build_form(&self, request: &ApiRequest) -> Result<Form, AssemblyError> {
        let mut form = Form::new();
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }

        let fallback;
        let sink = match &request.sink {
            Some(sink) => sink,
            None => {
                fallback = StreamErrorObserver::new().sink();
                &fallback
            }
        };

        for stream in &request.streams {
            let reader = stream.open(sink).await?;
            let chunks = ReaderStream::new(reader);
            let body: ByteStream = match &request.progress {
                Some(progress) => track_progress(
                    chunks,
                    stream.label().to_string(),
                    0,
                    Arc::clone(progress),
                ),
                None => Box::pin(chunks),
            };
            let body = reqwest::Body::wrap_stream(body);
            // Non-file parts carry no length so the body goes out chunked.
            let part = match (stream.is_file(), stream.size()) {
                (true, Some(len)) => Part::stream_with_length(body, len),
                _ => Part::stream(body),
            };
            form = form.part(
                stream.label().to_string(),
                part.file_name(stream.filename()),
            );
        }
        Ok(form)
    }
}

impl HttpTransport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse, AssemblyError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self.http.request(request.method.clone(), &request.url);
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if request.is_multipart() {
                builder = builder.multipart(self.build_form(request).await?);
            }

            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let text = resp.text().await?;
            debug!(method = %request.method, url = %request.url, status, "API response");

            let body = match serde_json::from_str::<Value>(&text) {
                Ok(value) => value,
                Err(_) => Value::String(text),
            };
            Ok(ApiResponse { status, body })
        })
    }
}
