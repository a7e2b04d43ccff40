//! `download.http`: stream one release archive to disk and verify it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use jacobine_core::domain::envelope::{self, DownloadHttpEnvelope, ExtractTargzEnvelope};
use jacobine_core::domain::record::Version;
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::checksum;
use jacobine_core::infrastructure::database::SqlValue;
use jacobine_core::infrastructure::http::FetchError;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::{StageContext, ensure_directory};

pub struct DownloadHttp {
    context: Arc<StageContext>,
}

impl DownloadHttp {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }

    /// Archives land directly under the project's releases root.
    fn target_path(&self, envelope: &DownloadHttpEnvelope) -> PathBuf {
        self.context
            .project
            .releases_path
            .join(archive_file_name(envelope))
    }

    /// Compare the downloaded bytes against the record's published digests.
    async fn verify_checksums(
        &self,
        version: &Version,
        path: &std::path::Path,
    ) -> Result<(), StageError> {
        let expected_md5 = version
            .checksum_tar_md5
            .as_deref()
            .ok_or_else(|| StageError::Invalid {
                reason: format!("version {} has no tar MD5 checksum", version.id),
            })?;
        let expected_sha1 = version
            .checksum_tar_sha1
            .as_deref()
            .ok_or_else(|| StageError::Invalid {
                reason: format!("version {} has no tar SHA1 checksum", version.id),
            })?;
        verify_archive(path, expected_md5, expected_sha1).await
    }
}

/// Verify a downloaded archive against its published MD5 and SHA1 digests.
/// On mismatch the file stays on disk for forensics; the caller rejects
/// the message without requeue and no follow-on is published.
pub async fn verify_archive(
    path: &std::path::Path,
    expected_md5: &str,
    expected_sha1: &str,
) -> Result<(), StageError> {
    let io_error = |source| {
        StageError::Fetch(FetchError::Io {
            path: path.to_path_buf(),
            source,
        })
    };

    let actual_md5 = checksum::md5_hex(path).await.map_err(io_error)?;
    if !actual_md5.eq_ignore_ascii_case(expected_md5) {
        return Err(StageError::Fetch(FetchError::ChecksumMismatch {
            path: path.to_path_buf(),
            algorithm: "MD5",
            expected: expected_md5.to_string(),
            actual: actual_md5,
        }));
    }

    let actual_sha1 = checksum::sha1_hex(path).await.map_err(io_error)?;
    if !actual_sha1.eq_ignore_ascii_case(expected_sha1) {
        return Err(StageError::Fetch(FetchError::ChecksumMismatch {
            path: path.to_path_buf(),
            algorithm: "SHA1",
            expected: expected_sha1.to_string(),
            actual: actual_sha1,
        }));
    }

    Ok(())
}

#[async_trait]
impl StageHandler for DownloadHttp {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::DownloadHttp)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: DownloadHttpEnvelope = envelope::decode(payload)?;
        let version = self.context.find_version(envelope.version_id).await?;
        let target = self.target_path(&envelope);

        // Redelivery after a lost ack: the archive is already verified on
        // disk, so only the follow-on needs to go out again.
        if version.downloaded && target.exists() {
            info!(version_id = version.id, path = %target.display(), "Archive already downloaded, re-publishing follow-on");
            self.publish_extract(&envelope, &target).await?;
            return Ok(());
        }
        if version.downloaded {
            warn!(version_id = version.id, path = %target.display(), "Downloaded flag set but file missing, downloading again");
        }

        let url = version
            .url_tar
            .as_deref()
            .ok_or_else(|| StageError::Invalid {
                reason: format!("version {} has no tar URL", version.id),
            })?;

        ensure_directory(&self.context.project.releases_path).await?;
        self.context
            .fetcher
            .download(url, &target, self.context.config.various.downloads.timeout())
            .await?;

        self.verify_checksums(&version, &target).await?;

        self.context
            .update_version(
                version.id,
                &[
                    ("downloaded", SqlValue::from(true)),
                    ("path_tar", SqlValue::from(target.display().to_string())),
                ],
            )
            .await?;

        self.publish_extract(&envelope, &target).await?;

        info!(version_id = version.id, path = %target.display(), "Release archive downloaded and verified");
        Ok(())
    }
}

impl DownloadHttp {
    async fn publish_extract(
        &self,
        envelope: &DownloadHttpEnvelope,
        target: &std::path::Path,
    ) -> Result<(), StageError> {
        self.context
            .publish(
                StageName::ExtractTargz,
                &ExtractTargzEnvelope {
                    project: envelope.project.clone(),
                    version_id: envelope.version_id,
                    path: target.to_path_buf(),
                },
            )
            .await
    }
}

/// File name from the envelope's prefix/postfix around the record id.
fn archive_file_name(envelope: &DownloadHttpEnvelope) -> String {
    format!(
        "{}{}{}",
        envelope.filename_prefix, envelope.version_id, envelope.filename_postfix
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn archive_file_name_combines_prefix_id_and_postfix() {
        let envelope = DownloadHttpEnvelope {
            project: "TYPO3".to_string(),
            version_id: 7,
            filename_prefix: "typo3_".to_string(),
            filename_postfix: ".tar.gz".to_string(),
        };
        assert_eq!(archive_file_name(&envelope), "typo3_7.tar.gz");
    }

    #[tokio::test]
    async fn matching_digests_pass() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        verify_archive(
            file.path(),
            "900150983cd24fb0d6963f7d28e17f72",
            "a9993e364706816aba3e25717850c26c9cd0d89d",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn digest_comparison_ignores_case() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        verify_archive(
            file.path(),
            "900150983CD24FB0D6963F7D28E17F72",
            "A9993E364706816ABA3E25717850C26C9CD0D89D",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn md5_mismatch_is_fatal_and_keeps_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"corrupted").unwrap();

        let err = verify_archive(
            file.path(),
            "900150983cd24fb0d6963f7d28e17f72",
            "a9993e364706816aba3e25717850c26c9cd0d89d",
        )
        .await
        .unwrap_err();

        match err {
            StageError::Fetch(FetchError::ChecksumMismatch { algorithm, .. }) => {
                assert_eq!(algorithm, "MD5");
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
        assert!(file.path().exists());
    }
}
