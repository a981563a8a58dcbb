//! Inline versus resumable upload selection.

use transloadit_protocol::constants::EXPECTED_UPLOADS_FIELD;
use transloadit_transfer::ResolvedStream;

/// How a submission's streams reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPlan {
    /// Streams travel inside the multipart create-call.
    Inline,
    /// The create-call announces the uploads; each stream is then sent
    /// through the resumable transport.
    Chunked { expected_uploads: usize },
}

impl TransportPlan {
    /// Extra create-call form fields this plan requires.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        match self {
            TransportPlan::Inline => Vec::new(),
            TransportPlan::Chunked { expected_uploads } => vec![(
                EXPECTED_UPLOADS_FIELD.to_string(),
                expected_uploads.to_string(),
            )],
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, TransportPlan::Chunked { .. })
    }
}

/// Picks the transport for a submission. The choice is final: it is never
/// revisited once the create-call has been sent.
///
/// A submission without streams always goes inline. Otherwise the caller's
/// preference decides, whatever kind of streams were supplied.
pub fn select_transport(resumable: bool, streams: &[impl AsRef<ResolvedStream>]) -> TransportPlan {
    if streams.is_empty() || !resumable {
        return TransportPlan::Inline;
    }
    TransportPlan::Chunked {
        expected_uploads: streams.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use transloadit_transfer::StreamHandle;

    async fn generic(label: &str) -> Arc<ResolvedStream> {
        Arc::new(
            StreamHandle::generic(label, &b"abc"[..], None)
                .resolve()
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn no_streams_is_inline() {
        let none: Vec<Arc<ResolvedStream>> = Vec::new();
        assert_eq!(select_transport(true, &none), TransportPlan::Inline);
        assert_eq!(select_transport(false, &none), TransportPlan::Inline);
    }

    #[tokio::test]
    async fn preference_decides_with_streams() {
        let streams = vec![generic("a").await, generic("b").await];
        assert_eq!(
            select_transport(true, &streams),
            TransportPlan::Chunked {
                expected_uploads: 2
            }
        );
        assert_eq!(select_transport(false, &streams), TransportPlan::Inline);
    }

    #[test]
    fn chunked_plan_announces_uploads() {
        let plan = TransportPlan::Chunked {
            expected_uploads: 3,
        };
        assert_eq!(
            plan.form_fields(),
            vec![("tus_num_expected_upload_files".to_string(), "3".to_string())]
        );
        assert!(TransportPlan::Inline.form_fields().is_empty());
    }
}
