//! Client for submitting assemblies and tracking them to completion.
//!
//! # Pipeline
//!
//! 1. **Validate**: check parameters and probe every input stream's size
//! 2. **Select**: commit to inline (multipart) or resumable uploads
//! 3. **Create**: signed create-call, retried on rate limiting
//! 4. **Upload**: resumable uploads with bounded concurrency
//! 5. **Wait**: optionally poll until the assembly leaves its busy states
//!
//! The create/upload/wait flow is raced against a stream-error observer so
//! a failing input aborts the submission immediately.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod poller;
pub mod requester;
pub mod selector;
pub mod signer;
pub mod submit;
pub mod types;
pub mod validator;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use client::Client;
pub use config::{ClientConfig, ConfigError};
pub use error::{ApiError, AssemblyError};
pub use http::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use poller::CompletionPoller;
pub use requester::{AttemptOutcome, RateLimitedRequester};
pub use selector::{TransportPlan, select_transport};
pub use signer::{SignedPayload, Signer};
pub use submit::AssemblySubmitter;
pub use types::{
    AssemblyIdCallback, AssemblyProgressCallback, AssemblyRequest, AwaitOptions, CallbackError,
};
pub use validator::{ParamsValidator, Severity, StructureValidator, ValidationIssue};

pub use transloadit_protocol::{AssemblyState, AssemblyStatus, Credentials, SignatureAlgorithm};
pub use transloadit_transfer::{ChunkSize, StreamHandle, UploadProgress};
