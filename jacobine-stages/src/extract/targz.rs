//! `extract.targz`: unpack a verified archive and fan out analysis work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use jacobine_core::domain::envelope::{self, AnalysisEnvelope, ExtractTargzEnvelope};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::SqlValue;
use jacobine_core::infrastructure::process::CommandSpec;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::{StageContext, ensure_directory};

pub struct ExtractTargz {
    context: Arc<StageContext>,
}

impl ExtractTargz {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }

    async fn fan_out(&self, envelope: &ExtractTargzEnvelope, directory: &Path) -> Result<(), StageError> {
        for analyzer in &self.context.project.analyzers {
            let Some(stage) = StageName::from_analyzer_token(analyzer) else {
                // Config validation rejects unknown tokens at startup.
                warn!(analyzer, "Skipping unknown analyzer");
                continue;
            };
            self.context
                .publish(
                    stage,
                    &AnalysisEnvelope {
                        project: envelope.project.clone(),
                        version_id: envelope.version_id,
                        directory: directory.to_path_buf(),
                    },
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StageHandler for ExtractTargz {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::ExtractTargz)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: ExtractTargzEnvelope = envelope::decode(payload)?;
        let version = self.context.find_version(envelope.version_id).await?;

        if !version.downloaded {
            return Err(StageError::Invalid {
                reason: format!("version {} is not downloaded yet", version.id),
            });
        }

        let directory = extract_directory(&envelope.path).ok_or_else(|| StageError::Invalid {
            reason: format!("cannot derive extract directory from {}", envelope.path.display()),
        })?;

        // Redelivery after a lost ack: the tree is already on disk, only
        // the fan-out needs to happen again.
        if version.extracted && directory.is_dir() {
            info!(version_id = version.id, directory = %directory.display(), "Already extracted, re-publishing analysis fan-out");
            self.fan_out(&envelope, &directory).await?;
            return Ok(());
        }

        let tar = &self.context.config.application.tar;
        ensure_directory(&directory).await?;

        self.context
            .runner
            .run(
                CommandSpec::new(&tar.binary)
                    .arg("-xzf")
                    .arg(envelope.path.display().to_string())
                    .arg("-C")
                    .arg(directory.display().to_string())
                    .timeout(tar.timeout()),
            )
            .await?
            .require_success()?;

        self.context
            .update_version(
                version.id,
                &[
                    ("extracted", SqlValue::from(true)),
                    (
                        "path_extracted",
                        SqlValue::from(directory.display().to_string()),
                    ),
                ],
            )
            .await?;

        self.fan_out(&envelope, &directory).await?;

        info!(version_id = version.id, directory = %directory.display(), "Archive extracted");
        Ok(())
    }
}

/// The extraction directory sits next to the archive, named after the
/// archive minus its `.tar.gz` suffix.
pub fn extract_directory(archive: &Path) -> Option<PathBuf> {
    let file_name = archive.file_name()?.to_str()?;
    let stem = file_name
        .strip_suffix(".tar.gz")
        .or_else(|| file_name.strip_suffix(".tgz"))
        .unwrap_or(file_name);
    if stem.is_empty() {
        return None;
    }
    Some(archive.with_file_name(stem))
}
