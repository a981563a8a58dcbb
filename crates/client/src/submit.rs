//! Submit an assembly, upload its streams and optionally wait for it.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use transloadit_protocol::AssemblyStatus;
use transloadit_transfer::{
    ChunkSize, CoordinatorOptions, ProgressAggregator, ProgressCallback, ResolvedStream,
    StreamErrorObserver, StreamErrorSink, StreamUploadCoordinator, UploadTarget, resolve_streams,
};

use crate::client::{Client, check_status};
use crate::error::AssemblyError;
use crate::http::ApiRequest;
use crate::selector::{TransportPlan, select_transport};
use crate::types::{AssemblyRequest, AwaitOptions};
use crate::validator::ValidationIssue;

/// Orchestrates one submission.
///
/// Everything that can be checked locally (parameters, stream labels,
/// file sizes, a caller-supplied id) is checked before the first request.
/// The id is then handed to the caller, and the create/upload/wait flow
/// runs as its own task raced against the stream-error observer. The
/// first to settle decides the outcome; the other is left to finish on
/// its own.
pub struct AssemblySubmitter {
    client: Client,
}

impl AssemblySubmitter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn submit(&self, request: AssemblyRequest) -> Result<AssemblyStatus, AssemblyError> {
        let started = Instant::now();
        let AssemblyRequest {
            params,
            fields,
            streams,
            resumable,
            concurrency,
            chunk_size,
            wait_for_completion,
            timeout,
            assembly_id,
            on_assembly_id,
            on_upload_progress,
            on_assembly_progress,
        } = request;

        self.check_params(&params)?;
        let streams: Vec<Arc<ResolvedStream>> = resolve_streams(streams)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();
        let assembly_id = match assembly_id {
            Some(id) => checked_id(id)?,
            None => Uuid::new_v4().simple().to_string(),
        };

        let plan = select_transport(resumable, &streams);
        info!(
            assembly_id = %assembly_id,
            streams = streams.len(),
            ?plan,
            "submitting assembly"
        );
        if let Some(callback) = &on_assembly_id {
            callback(&assembly_id);
        }

        let flow = SubmissionFlow {
            client: self.client.clone(),
            assembly_id,
            params,
            fields,
            streams,
            plan,
            concurrency,
            chunk_size,
            on_upload_progress,
            wait: wait_for_completion.then(|| AwaitOptions {
                timeout: timeout.or_else(|| self.client.config.default_timeout()),
                on_assembly_progress,
            }),
            started,
        };

        let mut observer = StreamErrorObserver::new();
        let handle = tokio::spawn(flow.run(observer.sink()));
        tokio::select! {
            // A read failure also fails the flow; report the root cause.
            biased;
            err = observer.first_error() => Err(AssemblyError::Stream(err)),
            joined = handle => joined.map_err(|e| AssemblyError::Task(e.to_string()))?,
        }
    }

    fn check_params(&self, params: &Value) -> Result<(), AssemblyError> {
        if !params.is_object() {
            return Err(AssemblyError::Precondition(
                "params must be a JSON object".into(),
            ));
        }
        let Some(validator) = &self.client.validator else {
            return Ok(());
        };

        let (errors, warnings): (Vec<ValidationIssue>, Vec<ValidationIssue>) = validator
            .validate(params)
            .into_iter()
            .partition(ValidationIssue::is_error);
        for issue in &warnings {
            warn!(issue = %issue, "assembly params warning");
        }
        if errors.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        Err(AssemblyError::Precondition(format!(
            "invalid params: {}",
            messages.join("; ")
        )))
    }
}

/// Caller-supplied ids end up in URL paths.
fn checked_id(id: String) -> Result<String, AssemblyError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(AssemblyError::Precondition(format!(
            "invalid assembly id: {id:?}"
        )))
    }
}

/// State owned by the create/upload/wait task of one submission.
struct SubmissionFlow {
    client: Client,
    assembly_id: String,
    params: Value,
    fields: Vec<(String, String)>,
    streams: Vec<Arc<ResolvedStream>>,
    plan: TransportPlan,
    concurrency: usize,
    chunk_size: ChunkSize,
    on_upload_progress: Option<ProgressCallback>,
    wait: Option<AwaitOptions>,
    started: Instant,
}

impl SubmissionFlow {
    async fn run(self, sink: StreamErrorSink) -> Result<AssemblyStatus, AssemblyError> {
        let status = self.create(&sink).await?;

        if self.plan.is_chunked() {
            let target = upload_target(&status)?;
            let coordinator = StreamUploadCoordinator::new(
                Arc::clone(&self.client.chunk_transport),
                self.streams.clone(),
                CoordinatorOptions {
                    concurrency: self.concurrency,
                    chunk_size: self.chunk_size,
                },
                self.on_upload_progress.clone(),
            );
            coordinator.run(target, sink).await?;
        }

        let Some(options) = &self.wait else {
            return Ok(status);
        };
        let assembly_id = status.assembly_id().unwrap_or(&self.assembly_id);
        let finished = self
            .client
            .wait_for(assembly_id, self.started, options)
            .await?;
        info!(
            assembly_id,
            ok = ?finished.ok(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "assembly finished"
        );
        Ok(finished)
    }

    /// The create-call. Inline plans carry the streams in its body.
    async fn create(&self, sink: &StreamErrorSink) -> Result<AssemblyStatus, AssemblyError> {
        let url = self.client.assembly_url(&self.assembly_id)?;
        let mut fields = self.fields.clone();
        fields.extend(self.plan.form_fields());

        let signed = self.client.signer.sign(&self.params)?;
        let mut request = ApiRequest::signed_form(Method::POST, url, &signed, fields);
        if !self.plan.is_chunked() && !self.streams.is_empty() {
            let progress = Arc::new(ProgressAggregator::new(
                self.streams.iter().map(|s| s.size()),
                self.on_upload_progress.clone(),
            ));
            request = request.with_streams(self.streams.clone(), sink.clone(), Some(progress));
        }

        let body = self.client.requester.execute(&request).await?;
        let status = check_status(AssemblyStatus::new(body))?;
        info!(assembly_id = %self.assembly_id, ok = ?status.ok(), "assembly created");
        Ok(status)
    }
}

/// Resumable uploads cannot start without both URLs from the create-call.
fn upload_target(status: &AssemblyStatus) -> Result<UploadTarget, AssemblyError> {
    let tus_url = status.tus_url().filter(|u| !u.is_empty()).ok_or_else(|| {
        AssemblyError::InconsistentResponse("create-call response has no tus_url".into())
    })?;
    let assembly_url = status.canonical_url().ok_or_else(|| {
        AssemblyError::InconsistentResponse("create-call response has no assembly URL".into())
    })?;
    Ok(UploadTarget {
        tus_url: tus_url.to_string(),
        assembly_url: assembly_url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use transloadit_transfer::{StreamError, StreamHandle, UploadProgress};

    use crate::http::ApiResponse;
    use crate::testing::{BrokenReader, ChunkEvent, ENDPOINT, MockApi, MockChunks, config, ok};
    use crate::validator::ParamsValidator;

    fn client(api: &Arc<MockApi>, chunks: &Arc<MockChunks>) -> Client {
        Client::with_transports(config(), api.clone(), chunks.clone()).unwrap()
    }

    fn uploading(id: &str) -> ApiResponse {
        ok(json!({
            "ok": "ASSEMBLY_UPLOADING",
            "assembly_id": id,
            "assembly_ssl_url": format!("https://api.test/assemblies/{id}"),
            "tus_url": "https://tus.test/resumable"
        }))
    }

    fn collecting() -> (ProgressCallback, Arc<Mutex<Vec<UploadProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |p| s.lock().unwrap().push(p));
        (cb, seen)
    }

    #[tokio::test]
    async fn zero_streams_make_one_create_call() {
        let api = Arc::new(MockApi::new().on(
            Method::POST,
            vec![ok(json!({"ok": "ASSEMBLY_EXECUTING", "assembly_id": "abc"}))],
        ));
        let chunks = Arc::new(MockChunks::default());
        let seen_id = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen_id);

        let request = AssemblyRequest::new(json!({"template_id": "t1"}))
            .field("user", "42")
            .on_assembly_id(move |id| *s.lock().unwrap() = Some(id.to_string()));
        let status = client(&api, &chunks).create_assembly(request).await.unwrap();

        assert_eq!(status.ok(), Some("ASSEMBLY_EXECUTING"));
        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        let id = seen_id.lock().unwrap().clone().unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(calls[0].method, Method::POST);
        assert_eq!(calls[0].url, format!("{ENDPOINT}/assemblies/{id}"));
        assert!(calls[0].field("params").unwrap().contains("\"template_id\":\"t1\""));
        assert!(calls[0].field("signature").unwrap().starts_with("sha384:"));
        assert_eq!(calls[0].field("user"), Some("42"));
        assert_eq!(calls[0].field("tus_num_expected_upload_files"), None);
        assert!(chunks.events().is_empty());
    }

    #[tokio::test]
    async fn two_files_upload_sequentially_with_concurrency_one() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, vec![1u8; 10240]).unwrap();
        std::fs::write(&b, vec![2u8; 20480]).unwrap();

        let api = Arc::new(MockApi::new().on(Method::POST, vec![uploading("abc")]));
        let chunks = Arc::new(MockChunks::default());
        let (cb, seen) = collecting();

        let request = AssemblyRequest::new(json!({"steps": {}}))
            .assembly_id("abc")
            .add_file("first", &a)
            .add_file("second", &b)
            .concurrency(1);
        let request = AssemblyRequest {
            on_upload_progress: Some(cb),
            ..request
        };
        let status = client(&api, &chunks).create_assembly(request).await.unwrap();
        assert_eq!(status.ok(), Some("ASSEMBLY_UPLOADING"));

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].field("tus_num_expected_upload_files"), Some("2"));
        assert!(calls[0].streams.is_empty());

        let events = chunks.events();
        assert_eq!(
            events,
            vec![
                ChunkEvent::Create {
                    fieldname: "first".into(),
                    filename: "a.bin".into(),
                    assembly_url: "https://api.test/assemblies/abc".into(),
                    length: Some(10240),
                },
                ChunkEvent::Patch {
                    location: "https://tus.test/resumable/files/first".into(),
                    offset: 0,
                    len: 10240,
                },
                ChunkEvent::Create {
                    fieldname: "second".into(),
                    filename: "b.bin".into(),
                    assembly_url: "https://api.test/assemblies/abc".into(),
                    length: Some(20480),
                },
                ChunkEvent::Patch {
                    location: "https://tus.test/resumable/files/second".into(),
                    offset: 0,
                    len: 20480,
                },
            ]
        );

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0].uploaded_bytes < w[1].uploaded_bytes));
        assert!(seen.iter().all(|p| p.total_bytes == Some(30720)));
        assert_eq!(
            seen.last(),
            Some(&UploadProgress {
                uploaded_bytes: 30720,
                total_bytes: Some(30720)
            })
        );
    }

    #[tokio::test]
    async fn missing_tus_url_is_inconsistent() {
        let api = Arc::new(MockApi::new().on(
            Method::POST,
            vec![ok(json!({
                "ok": "ASSEMBLY_UPLOADING",
                "assembly_ssl_url": "https://api.test/assemblies/abc"
            }))],
        ));
        let chunks = Arc::new(MockChunks::default());

        let request = AssemblyRequest::new(json!({}))
            .add_stream(StreamHandle::generic("notes", &b"hello"[..], Some(5)));
        let err = client(&api, &chunks)
            .create_assembly(request)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::InconsistentResponse(_)));
        assert!(chunks.events().is_empty());
    }

    #[tokio::test]
    async fn generic_stream_uses_deferred_length() {
        let api = Arc::new(MockApi::new().on(Method::POST, vec![uploading("abc")]));
        let chunks = Arc::new(MockChunks::default());

        let request = AssemblyRequest::new(json!({}))
            .add_stream(StreamHandle::generic("notes", &b"hello"[..], None));
        client(&api, &chunks).create_assembly(request).await.unwrap();

        let events = chunks.events();
        assert!(matches!(
            &events[0],
            ChunkEvent::Create { length: None, filename, .. } if filename == "notes"
        ));
        assert!(matches!(events.last(), Some(ChunkEvent::Patch { len: 5, .. })));
    }

    #[tokio::test]
    async fn inline_uploads_report_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let api = Arc::new(MockApi::new().on(
            Method::POST,
            vec![ok(json!({"ok": "ASSEMBLY_EXECUTING"}))],
        ));
        let chunks = Arc::new(MockChunks::default());
        let (cb, seen) = collecting();

        let request = AssemblyRequest::new(json!({}))
            .resumable(false)
            .add_file("doc", &path)
            .add_stream(StreamHandle::generic("extra", &b"abcde"[..], Some(5)));
        let request = AssemblyRequest {
            on_upload_progress: Some(cb),
            ..request
        };
        client(&api, &chunks).create_assembly(request).await.unwrap();

        let calls = api.calls();
        assert_eq!(calls[0].streams, vec!["doc".to_string(), "extra".to_string()]);
        assert!(chunks.events().is_empty());
        assert_eq!(
            seen.lock().unwrap().last(),
            Some(&UploadProgress {
                uploaded_bytes: 15,
                total_bytes: Some(15)
            })
        );
    }

    #[tokio::test]
    async fn stream_failure_aborts_submission() {
        let api = Arc::new(MockApi::new().on(
            Method::POST,
            vec![ok(json!({"ok": "ASSEMBLY_EXECUTING"}))],
        ));
        let chunks = Arc::new(MockChunks::default());

        let request = AssemblyRequest::new(json!({}))
            .resumable(false)
            .add_stream(StreamHandle::generic("broken", BrokenReader, None));
        let err = client(&api, &chunks)
            .create_assembly(request)
            .await
            .unwrap_err();
        match err {
            AssemblyError::Stream(StreamError::Read { label, .. }) => assert_eq!(label, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreadable_file_fails_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(MockApi::new());
        let chunks = Arc::new(MockChunks::default());
        let id_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&id_calls);

        let request = AssemblyRequest::new(json!({}))
            .add_file("video", dir.path().join("missing.mp4"))
            .on_assembly_id(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let err = client(&api, &chunks)
            .create_assembly(request)
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(api.calls().is_empty());
        assert_eq!(id_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_inputs_fail_before_network() {
        struct RejectAll;
        impl ParamsValidator for RejectAll {
            fn validate(&self, _params: &Value) -> Vec<ValidationIssue> {
                vec![
                    ValidationIssue::warning("just saying"),
                    ValidationIssue::error("no robots").at("steps"),
                ]
            }
        }

        let api = Arc::new(MockApi::new());
        let chunks = Arc::new(MockChunks::default());
        let rejecting = client(&api, &chunks).with_validator(RejectAll);

        let err = rejecting
            .create_assembly(AssemblyRequest::new(json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("steps: no robots"));

        let err = client(&api, &chunks)
            .create_assembly(AssemblyRequest::new(json!("not an object")))
            .await
            .unwrap_err();
        assert!(err.is_precondition());

        let err = client(&api, &chunks)
            .create_assembly(AssemblyRequest::new(json!({})).assembly_id("../etc"))
            .await
            .unwrap_err();
        assert!(err.is_precondition());

        let err = client(&api, &chunks)
            .create_assembly(
                AssemblyRequest::new(json!({}))
                    .add_stream(StreamHandle::generic("same", &b""[..], None))
                    .add_stream(StreamHandle::generic("same", &b""[..], None)),
            )
            .await
            .unwrap_err();
        assert!(err.is_precondition());

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn error_token_in_create_response_fails() {
        let api = Arc::new(MockApi::new().on(
            Method::POST,
            vec![ok(json!({
                "error": "GET_ACCOUNT_UNKNOWN_AUTH_KEY",
                "message": "unknown key",
                "assembly_id": "abc"
            }))],
        ));
        let chunks = Arc::new(MockChunks::default());

        let err = client(&api, &chunks)
            .create_assembly(AssemblyRequest::new(json!({})))
            .await
            .unwrap_err();
        match err {
            AssemblyError::Api(api_err) => {
                assert_eq!(api_err.code, "GET_ACCOUNT_UNKNOWN_AUTH_KEY");
                assert_eq!(api_err.assembly_id.as_deref(), Some("abc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_call_is_retried_when_rate_limited() {
        let limited = ApiResponse {
            status: 413,
            body: json!({"error": "RATE_LIMIT_REACHED", "info": {"retryIn": 1}}),
        };
        let api = Arc::new(MockApi::new().on(
            Method::POST,
            vec![
                limited.clone(),
                limited,
                ok(json!({"ok": "ASSEMBLY_EXECUTING"})),
            ],
        ));
        let chunks = Arc::new(MockChunks::default());

        let status = client(&api, &chunks)
            .create_assembly(AssemblyRequest::new(json!({})))
            .await
            .unwrap();
        assert_eq!(status.ok(), Some("ASSEMBLY_EXECUTING"));

        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        // One signature, reused verbatim across attempts.
        assert!(calls.iter().all(|c| c.field("params") == calls[0].field("params")));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_completion() {
        let api = Arc::new(
            MockApi::new()
                .on(
                    Method::POST,
                    vec![ok(json!({"ok": "ASSEMBLY_EXECUTING", "assembly_id": "abc"}))],
                )
                .on(
                    Method::GET,
                    vec![
                        ok(json!({"ok": "ASSEMBLY_EXECUTING", "assembly_id": "abc"})),
                        ok(json!({"ok": "ASSEMBLY_COMPLETED", "assembly_id": "abc"})),
                    ],
                ),
        );
        let chunks = Arc::new(MockChunks::default());
        let busy = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&busy);

        let request = AssemblyRequest::new(json!({}))
            .assembly_id("abc")
            .wait_for_completion(true)
            .on_assembly_progress(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let status = client(&api, &chunks).create_assembly(request).await.unwrap();
        assert_eq!(status.ok(), Some("ASSEMBLY_COMPLETED"));
        assert_eq!(busy.load(Ordering::SeqCst), 1);

        let gets: Vec<_> = api
            .calls()
            .into_iter()
            .filter(|c| c.method == Method::GET)
            .collect();
        assert_eq!(gets.len(), 2);
        assert_eq!(gets[0].url, format!("{ENDPOINT}/assemblies/abc"));
        assert!(gets[0].query.iter().any(|(k, _)| k == "signature"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let api = Arc::new(
            MockApi::new()
                .on(Method::POST, vec![ok(json!({"ok": "ASSEMBLY_EXECUTING"}))])
                .on(Method::GET, vec![ok(json!({"ok": "ASSEMBLY_EXECUTING"}))]),
        );
        let chunks = Arc::new(MockChunks::default());

        let request = AssemblyRequest::new(json!({}))
            .wait_for_completion(true)
            .timeout(Duration::from_secs(3));
        let err = client(&api, &chunks)
            .create_assembly(request)
            .await
            .unwrap_err();
        assert!(matches!(err, AssemblyError::PollingTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_assembly_is_an_api_error() {
        let api = Arc::new(
            MockApi::new()
                .on(Method::POST, vec![ok(json!({"ok": "ASSEMBLY_EXECUTING"}))])
                .on(
                    Method::GET,
                    vec![ok(json!({
                        "error": "INVALID_FILE_META_DATA",
                        "message": "bad file",
                        "assembly_ssl_url": "https://api.test/assemblies/abc"
                    }))],
                ),
        );
        let chunks = Arc::new(MockChunks::default());

        let err = client(&api, &chunks)
            .create_assembly(AssemblyRequest::new(json!({})).wait_for_completion(true))
            .await
            .unwrap_err();
        match err {
            AssemblyError::Api(api_err) => {
                assert_eq!(api_err.code, "INVALID_FILE_META_DATA");
                assert_eq!(
                    api_err.assembly_ssl_url.as_deref(),
                    Some("https://api.test/assemblies/abc")
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
