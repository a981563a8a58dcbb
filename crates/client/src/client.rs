//! Client facade.

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::info;

use transloadit_protocol::{AssemblyState, AssemblyStatus, ListPage};
use transloadit_transfer::{ChunkTransport, TusTransport};

use crate::config::ClientConfig;
use crate::error::{ApiError, AssemblyError};
use crate::http::{ApiRequest, HttpTransport, ReqwestTransport, build_http_client};
use crate::poller::CompletionPoller;
use crate::requester::RateLimitedRequester;
use crate::signer::{SignedPayload, Signer};
use crate::submit::AssemblySubmitter;
use crate::types::{AssemblyRequest, AwaitOptions};
use crate::validator::ParamsValidator;

/// Characters escaped in URL path segments.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// API client. Cheap to clone; clones share transports and configuration.
#[derive(Clone)]
pub struct Client {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) signer: Signer,
    pub(crate) requester: RateLimitedRequester,
    pub(crate) chunk_transport: Arc<dyn ChunkTransport>,
    pub(crate) poller: CompletionPoller,
    pub(crate) validator: Option<Arc<dyn ParamsValidator>>,
}

impl Client {
    /// Creates a client talking HTTP to `config.endpoint`.
    ///
    /// Fails with a precondition error when the key or secret is empty.
    pub fn new(config: ClientConfig) -> Result<Self, AssemblyError> {
        config.validate()?;
        let http = build_http_client(&config)?;
        let api = Arc::new(ReqwestTransport::new(http.clone()));
        let chunks = Arc::new(TusTransport::new(http, HeaderMap::new()));
        Self::with_transports(config, api, chunks)
    }

    /// Creates a client over caller-supplied transports.
    pub fn with_transports(
        config: ClientConfig,
        http: Arc<dyn HttpTransport>,
        chunks: Arc<dyn ChunkTransport>,
    ) -> Result<Self, AssemblyError> {
        config.validate()?;
        let signer = Signer::new(config.credentials(), config.signature_algorithm);
        let requester = RateLimitedRequester::new(http, config.max_retries);
        let poller = CompletionPoller::new(config.poll_interval());
        Ok(Self {
            config: Arc::new(config),
            signer,
            requester,
            chunk_transport: chunks,
            poller,
            validator: None,
        })
    }

    /// Runs `validator` on the parameters of every submission.
    pub fn with_validator(mut self, validator: impl ParamsValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Signs `params` for embedding in a form or URL.
    pub fn sign(&self, params: &Value) -> Result<SignedPayload, AssemblyError> {
        self.signer.sign(params)
    }

    /// Submits an assembly; see [`AssemblySubmitter`].
    pub async fn create_assembly(
        &self,
        request: AssemblyRequest,
    ) -> Result<AssemblyStatus, AssemblyError> {
        AssemblySubmitter::new(self.clone()).submit(request).await
    }

    /// Fetches the current status of an assembly.
    pub async fn get_assembly(&self, assembly_id: &str) -> Result<AssemblyStatus, AssemblyError> {
        let url = self.assembly_url(assembly_id)?;
        self.get_status(&url).await
    }

    async fn get_status(&self, url: &str) -> Result<AssemblyStatus, AssemblyError> {
        let signed = self.signer.sign(&json!({}))?;
        let request = ApiRequest::signed_query(Method::GET, url, &signed);
        let body = self.requester.execute(&request).await?;
        Ok(AssemblyStatus::new(body))
    }

    /// Cancels an assembly through its own status URL.
    pub async fn cancel_assembly(
        &self,
        assembly_id: &str,
    ) -> Result<AssemblyStatus, AssemblyError> {
        let current = self.get_assembly(assembly_id).await?;
        let url = current.canonical_url().ok_or_else(|| {
            AssemblyError::InconsistentResponse(format!(
                "status of {assembly_id} carries no assembly URL"
            ))
        })?;

        let signed = self.signer.sign(&json!({}))?;
        let request = ApiRequest::signed_query(Method::DELETE, url, &signed);
        let status = AssemblyStatus::new(self.requester.execute(&request).await?);
        info!(assembly_id, ok = ?status.ok(), "assembly cancel requested");
        check_status(status)
    }

    /// Re-runs a finished assembly, optionally with new parameters.
    pub async fn replay_assembly(
        &self,
        assembly_id: &str,
        params: Value,
    ) -> Result<AssemblyStatus, AssemblyError> {
        let url = format!("{}/replay", self.assembly_url(assembly_id)?);
        let signed = self.signer.sign(&params)?;
        let request = ApiRequest::signed_form(Method::POST, url, &signed, Vec::new());
        let status = AssemblyStatus::new(self.requester.execute(&request).await?);
        check_status(status)
    }

    /// Lists assemblies, one page at a time. Pages start at 1.
    pub async fn list_assemblies(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<ListPage, AssemblyError> {
        if page == 0 || page_size == 0 {
            return Err(AssemblyError::Precondition(
                "page and page_size must be positive".into(),
            ));
        }
        let url = format!("{}/assemblies", self.config.base_url());
        let signed = self
            .signer
            .sign(&json!({"page": page, "pagesize": page_size}))?;
        let request = ApiRequest::signed_query(Method::GET, url, &signed);
        let body = self.requester.execute(&request).await?;
        if body.get("error").is_some() {
            return Err(AssemblyError::api(ApiError::from_body(&body, None)));
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Waits for an existing assembly to finish.
    ///
    /// The timeout counts from this call. A terminal error status is
    /// returned as an error.
    pub async fn await_assembly_completion(
        &self,
        assembly_id: &str,
        options: AwaitOptions,
    ) -> Result<AssemblyStatus, AssemblyError> {
        self.wait_for(assembly_id, Instant::now(), &options).await
    }

    pub(crate) async fn wait_for(
        &self,
        assembly_id: &str,
        started: Instant,
        options: &AwaitOptions,
    ) -> Result<AssemblyStatus, AssemblyError> {
        let url = self.assembly_url(assembly_id)?;
        let status = self
            .poller
            .poll(
                assembly_id,
                || self.get_status(&url),
                started,
                options.timeout,
                options.on_assembly_progress.as_ref(),
            )
            .await?;
        check_status(status)
    }

    /// `{endpoint}/assemblies/{id}`, with the id escaped.
    pub(crate) fn assembly_url(&self, assembly_id: &str) -> Result<String, AssemblyError> {
        if assembly_id.trim().is_empty() {
            return Err(AssemblyError::Precondition("empty assembly id".into()));
        }
        Ok(format!(
            "{}/assemblies/{}",
            self.config.base_url(),
            utf8_percent_encode(assembly_id, PATH_SEGMENT)
        ))
    }
}

/// Turns a status carrying an error token into an [`AssemblyError::Api`].
pub(crate) fn check_status(status: AssemblyStatus) -> Result<AssemblyStatus, AssemblyError> {
    match status.state() {
        AssemblyState::Failed(_) => Err(AssemblyError::api(ApiError::from_body(
            status.body(),
            None,
        ))),
        _ => Ok(status),
    }
}
