use std::time::Duration;

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api2.transloadit.com";

/// Name of the client-identification header attached to every call.
pub const CLIENT_HEADER: &str = "Transloadit-Client";

/// Prefix of the client-identification header value.
pub const CLIENT_NAME: &str = "rust-sdk";

/// How long a signature stays valid when `auth.expires` is injected.
pub const SIGNATURE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Format of `auth.expires`, always rendered in UTC.
pub const EXPIRES_FORMAT: &str = "%Y/%m/%d %H:%M:%S+00:00";

/// Error token the API returns when admission control rejects a call.
pub const RATE_LIMIT_ERROR: &str = "RATE_LIMIT_REACHED";

/// HTTP status that accompanies [`RATE_LIMIT_ERROR`].
pub const RATE_LIMIT_STATUS: u16 = 413;

/// Upper bound on a server-directed rate-limit delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Form field telling the server how many resumable uploads to expect.
pub const EXPECTED_UPLOADS_FIELD: &str = "tus_num_expected_upload_files";

/// Version of the resumable upload protocol spoken by the chunk transport.
pub const TUS_VERSION: &str = "1.0.0";

// Busy `ok` tokens.
pub const ASSEMBLY_UPLOADING: &str = "ASSEMBLY_UPLOADING";
pub const ASSEMBLY_EXECUTING: &str = "ASSEMBLY_EXECUTING";
pub const ASSEMBLY_REPLAYING: &str = "ASSEMBLY_REPLAYING";

// Terminal `ok` tokens.
pub const ASSEMBLY_COMPLETED: &str = "ASSEMBLY_COMPLETED";
pub const ASSEMBLY_CANCELED: &str = "ASSEMBLY_CANCELED";
pub const REQUEST_ABORTED: &str = "REQUEST_ABORTED";
