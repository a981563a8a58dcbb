pub mod constants;
pub mod envelope;
pub mod status;
pub mod types;

// Re-export primary types for convenience.
pub use envelope::{ErrorEnvelope, ErrorInfo};
pub use status::{AssemblyState, AssemblyStatus, BusyState, FinishedState};
pub use types::{Credentials, ListPage, SignatureAlgorithm, UnknownAlgorithm};
