//! Remote assembly status snapshots.

use serde::{Deserialize, Serialize};

use crate::constants::{
    ASSEMBLY_CANCELED, ASSEMBLY_COMPLETED, ASSEMBLY_EXECUTING, ASSEMBLY_REPLAYING,
    ASSEMBLY_UPLOADING, REQUEST_ABORTED,
};

/// A status snapshot as returned by the API.
///
/// The body is kept verbatim; accessors read the fields the client
/// depends on. Snapshots are never mutated, only replaced by newer ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssemblyStatus(serde_json::Value);

/// Sub-kind of a status that is still in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusyState {
    Uploading,
    Executing,
    Replaying,
}

/// Sub-kind of a successfully finished status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishedState {
    Completed,
    Canceled,
    Aborted,
    /// An `ok` token this client does not know; treated as terminal.
    Other(String),
}

/// Classification of an [`AssemblyStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyState {
    Busy(BusyState),
    Finished(FinishedState),
    /// The body carried an `error` token.
    Failed(String),
    /// Neither `ok` nor `error`: a low-level failure shape.
    TransportFailure,
}

impl AssemblyState {
    pub fn is_busy(&self) -> bool {
        matches!(self, AssemblyState::Busy(_))
    }
}

impl AssemblyStatus {
    pub fn new(body: serde_json::Value) -> Self {
        Self(body)
    }

    /// Returns the raw JSON body.
    pub fn body(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_body(self) -> serde_json::Value {
        self.0
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    pub fn ok(&self) -> Option<&str> {
        self.str_field("ok")
    }

    pub fn error(&self) -> Option<&str> {
        self.str_field("error")
    }

    pub fn message(&self) -> Option<&str> {
        self.str_field("message")
    }

    pub fn assembly_id(&self) -> Option<&str> {
        self.str_field("assembly_id")
    }

    pub fn assembly_url(&self) -> Option<&str> {
        self.str_field("assembly_url")
    }

    pub fn assembly_ssl_url(&self) -> Option<&str> {
        self.str_field("assembly_ssl_url")
    }

    /// Base endpoint for resumable uploads, returned at creation time.
    pub fn tus_url(&self) -> Option<&str> {
        self.str_field("tus_url")
    }

    /// Canonical URL of the assembly, preferring the TLS variant.
    pub fn canonical_url(&self) -> Option<&str> {
        self.assembly_ssl_url().or_else(|| self.assembly_url())
    }

    /// Classifies the snapshot. Errors win over `ok` tokens.
    pub fn state(&self) -> AssemblyState {
        if let Some(error) = self.error() {
            return AssemblyState::Failed(error.to_string());
        }
        match self.ok() {
            Some(ASSEMBLY_UPLOADING) => AssemblyState::Busy(BusyState::Uploading),
            Some(ASSEMBLY_EXECUTING) => AssemblyState::Busy(BusyState::Executing),
            Some(ASSEMBLY_REPLAYING) => AssemblyState::Busy(BusyState::Replaying),
            Some(ASSEMBLY_COMPLETED) => AssemblyState::Finished(FinishedState::Completed),
            Some(ASSEMBLY_CANCELED) => AssemblyState::Finished(FinishedState::Canceled),
            Some(REQUEST_ABORTED) => AssemblyState::Finished(FinishedState::Aborted),
            Some(other) => AssemblyState::Finished(FinishedState::Other(other.to_string())),
            None => AssemblyState::TransportFailure,
        }
    }
}

impl From<serde_json::Value> for AssemblyStatus {
    fn from(body: serde_json::Value) -> Self {
        Self(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn busy_tokens() {
        for (token, expected) in [
            ("ASSEMBLY_UPLOADING", BusyState::Uploading),
            ("ASSEMBLY_EXECUTING", BusyState::Executing),
            ("ASSEMBLY_REPLAYING", BusyState::Replaying),
        ] {
            let status = AssemblyStatus::new(json!({"ok": token}));
            assert_eq!(status.state(), AssemblyState::Busy(expected));
            assert!(status.state().is_busy());
        }
    }

    #[test]
    fn completed_is_finished() {
        let status = AssemblyStatus::new(json!({"ok": "ASSEMBLY_COMPLETED"}));
        assert_eq!(
            status.state(),
            AssemblyState::Finished(FinishedState::Completed)
        );
    }

    #[test]
    fn unknown_ok_token_is_terminal() {
        let status = AssemblyStatus::new(json!({"ok": "SOMETHING_NEW"}));
        assert_eq!(
            status.state(),
            AssemblyState::Finished(FinishedState::Other("SOMETHING_NEW".into()))
        );
    }

    #[test]
    fn error_wins_over_ok() {
        let status = AssemblyStatus::new(json!({
            "ok": "ASSEMBLY_EXECUTING",
            "error": "INTERNAL_COMMAND_ERROR"
        }));
        assert_eq!(
            status.state(),
            AssemblyState::Failed("INTERNAL_COMMAND_ERROR".into())
        );
    }

    #[test]
    fn missing_tokens_is_transport_failure() {
        let status = AssemblyStatus::new(json!({"errno": "ECONNRESET"}));
        assert_eq!(status.state(), AssemblyState::TransportFailure);
    }

    #[test]
    fn canonical_url_prefers_ssl() {
        let status = AssemblyStatus::new(json!({
            "assembly_url": "http://api2.example.com/assemblies/a",
            "assembly_ssl_url": "https://api2.example.com/assemblies/a"
        }));
        assert_eq!(
            status.canonical_url(),
            Some("https://api2.example.com/assemblies/a")
        );

        let plain = AssemblyStatus::new(json!({
            "assembly_url": "http://api2.example.com/assemblies/a"
        }));
        assert_eq!(
            plain.canonical_url(),
            Some("http://api2.example.com/assemblies/a")
        );
    }

    #[test]
    fn transparent_serde() {
        let body = json!({"ok": "ASSEMBLY_COMPLETED", "assembly_id": "x"});
        let status: AssemblyStatus = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(status.assembly_id(), Some("x"));
        assert_eq!(serde_json::to_value(&status).unwrap(), body);
    }
}
