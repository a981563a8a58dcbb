use std::collections::HashSet;

use crate::TransferError;

/// Validates stream labels, which become multipart field names and
/// resumable `fieldname` metadata.
///
/// Rejects:
/// - Empty or whitespace-only labels
/// - Labels containing control characters (they cannot travel in headers)
/// - Duplicate labels
pub fn validate_labels<'a, I>(labels: I) -> Result<(), TransferError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for label in labels {
        if label.trim().is_empty() {
            return Err(TransferError::InvalidLabel("empty label".into()));
        }
        if label.chars().any(char::is_control) {
            return Err(TransferError::InvalidLabel(format!(
                "control character in label: {label:?}"
            )));
        }
        if !seen.insert(label) {
            return Err(TransferError::InvalidLabel(format!(
                "duplicate label: {label}"
            )));
        }
    }
    Ok(())
}
