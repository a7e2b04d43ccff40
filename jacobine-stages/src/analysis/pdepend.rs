//! `analysis.pdepend`: software metrics charts for an extracted release.
//!
//! pdepend writes its artifacts itself; this stage supervises the run and
//! records where the artifacts landed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jacobine_core::domain::envelope::{self, AnalysisEnvelope};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::SqlValue;
use jacobine_core::infrastructure::process::CommandSpec;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::StageContext;

const SUMMARY_FILE: &str = "pdepend_summary.xml";
const JDEPEND_FILE: &str = "pdepend_jdepend.svg";
const PYRAMID_FILE: &str = "pdepend_pyramid.svg";

pub struct PDepend {
    context: Arc<StageContext>,
}

impl PDepend {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl StageHandler for PDepend {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::AnalysisPdepend)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: AnalysisEnvelope = envelope::decode(payload)?;
        let version = self.context.find_version(envelope.version_id).await?;

        if !version.extracted {
            return Err(StageError::Invalid {
                reason: format!("version {} is not extracted yet", version.id),
            });
        }
        if version.analyzed_pdepend {
            info!(version_id = version.id, "pdepend artifacts already recorded, skipping");
            return Ok(());
        }

        let tool = &self.context.config.application.pdepend;
        let summary = envelope.directory.join(SUMMARY_FILE);
        let jdepend = envelope.directory.join(JDEPEND_FILE);
        let pyramid = envelope.directory.join(PYRAMID_FILE);

        let mut command = CommandSpec::new(&tool.binary)
            .arg(format!("--summary-xml={}", summary.display()))
            .arg(format!("--jdepend-chart={}", jdepend.display()))
            .arg(format!("--overview-pyramid={}", pyramid.display()));
        if let Some(pattern) = &tool.file_pattern {
            command = command.arg(format!("--suffix={pattern}"));
        }
        command = command
            .arg(envelope.directory.display().to_string())
            .timeout(tool.timeout());

        self.context.runner.run(command).await?.require_success()?;

        if !summary.is_file() {
            return Err(StageError::Invalid {
                reason: format!("pdepend reported success but {} is missing", summary.display()),
            });
        }

        let mut gateway = self.context.gateway.lock().await;
        gateway
            .delete(
                "pdepend_results",
                &[("version_id", SqlValue::from(version.id))],
            )
            .await?;
        gateway
            .insert(
                "pdepend_results",
                &[
                    ("version_id", SqlValue::from(version.id)),
                    ("summary_xml", SqlValue::from(summary.display().to_string())),
                    ("jdepend_chart", SqlValue::from(jdepend.display().to_string())),
                    (
                        "overview_pyramid",
                        SqlValue::from(pyramid.display().to_string()),
                    ),
                ],
            )
            .await?;
        drop(gateway);

        self.context
            .update_version(version.id, &[("analyzed_pdepend", SqlValue::from(true))])
            .await?;

        info!(version_id = version.id, summary = %summary.display(), "pdepend artifacts recorded");
        Ok(())
    }
}
