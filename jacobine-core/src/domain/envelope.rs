//! Wire envelopes.
//!
//! Every broker message body is a JSON object with camelCase keys. Each
//! routing key has exactly one envelope schema; consumers validate on
//! decode and reject malformed payloads without requeue.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Payload of `download.http`: fetch one release archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadHttpEnvelope {
    pub project: String,
    pub version_id: u64,
    pub filename_prefix: String,
    pub filename_postfix: String,
}

/// Payload of `extract.targz`: unpack a downloaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTargzEnvelope {
    pub project: String,
    pub version_id: u64,
    /// Absolute path of the archive on the shared filesystem root.
    pub path: PathBuf,
}

/// Payload of `download.git`: clone or update one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGitEnvelope {
    pub project: String,
    pub gitweb_id: u64,
}

/// Payload of `analysis.cvsanaly`: mine a finished checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CvsanalyEnvelope {
    pub project: String,
    pub gitweb_id: u64,
    pub checkout_dir: PathBuf,
}

/// Payload of `analysis.phploc`, `analysis.pdepend`, and
/// `analysis.github.linguist`: run a tool over an extracted release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEnvelope {
    pub project: String,
    pub version_id: u64,
    pub directory: PathBuf,
}

/// A payload that does not decode into the stage's envelope schema.
#[derive(Debug, thiserror::Error)]
#[error("malformed envelope ({reason}): {preview}")]
pub struct EnvelopeError {
    pub reason: String,
    /// Truncated payload for the dead-letter forensics log.
    pub preview: String,
}

const PREVIEW_LIMIT: usize = 200;

/// Decode a message body into the stage's envelope type.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, EnvelopeError> {
    serde_json::from_slice(payload).map_err(|e| EnvelopeError {
        reason: e.to_string(),
        preview: preview(payload),
    })
}

fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.len() <= PREVIEW_LIMIT {
        return text.into_owned();
    }
    let mut end = PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_camel_case_keys() {
        let body = br#"{"project":"TYPO3","versionId":7,"filenamePrefix":"typo3_","filenamePostfix":".tar.gz"}"#;
        let envelope: DownloadHttpEnvelope = decode(body).unwrap();
        assert_eq!(envelope.project, "TYPO3");
        assert_eq!(envelope.version_id, 7);
        assert_eq!(envelope.filename_prefix, "typo3_");
    }

    #[test]
    fn round_trips_on_the_wire() {
        let envelope = CvsanalyEnvelope {
            project: "TYPO3".to_string(),
            gitweb_id: 42,
            checkout_dir: PathBuf::from("/data/typo3/git/typo3-core"),
        };
        let body = serde_json::to_vec(&envelope).unwrap();
        let text = String::from_utf8(body.clone()).unwrap();
        assert!(text.contains("\"gitwebId\":42"));
        assert!(text.contains("\"checkoutDir\""));
        assert_eq!(decode::<CvsanalyEnvelope>(&body).unwrap(), envelope);
    }

    #[test]
    fn rejects_missing_fields() {
        let err = decode::<DownloadHttpEnvelope>(br#"{"project":"TYPO3"}"#).unwrap_err();
        assert!(err.reason.contains("versionId"));
    }

    #[test]
    fn rejects_non_json_payloads() {
        let err = decode::<AnalysisEnvelope>(b"not json at all").unwrap_err();
        assert_eq!(err.preview, "not json at all");
    }
}
