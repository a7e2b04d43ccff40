//! `analysis.cvsanaly`: mine a Git checkout's history.
//!
//! CVSAnaly maintains its own result database, configured through the
//! per-project config file; this stage only supervises the run.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jacobine_core::domain::envelope::{self, CvsanalyEnvelope};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::process::CommandSpec;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::StageContext;

pub struct Cvsanaly {
    context: Arc<StageContext>,
}

impl Cvsanaly {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl StageHandler for Cvsanaly {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::AnalysisCvsanaly)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: CvsanalyEnvelope = envelope::decode(payload)?;
        let record = self.context.find_gitweb(envelope.gitweb_id).await?;

        if !envelope.checkout_dir.is_dir() {
            return Err(StageError::Invalid {
                reason: format!(
                    "checkout directory {} does not exist",
                    envelope.checkout_dir.display()
                ),
            });
        }

        let config_file = self
            .context
            .project
            .cvsanaly_config_file
            .as_ref()
            .ok_or_else(|| StageError::Invalid {
                reason: format!(
                    "project {} has no cvsanaly config file",
                    self.context.project_name
                ),
            })?;

        let tool = &self.context.config.application.cvsanaly;
        self.context
            .runner
            .run(
                CommandSpec::new(&tool.binary)
                    .arg("--config-file")
                    .arg(config_file.display().to_string())
                    .arg(envelope.checkout_dir.display().to_string())
                    .timeout(tool.timeout()),
            )
            .await?
            .require_success()?;

        info!(gitweb_id = record.id, checkout = %envelope.checkout_dir.display(), "History mining finished");
        Ok(())
    }
}
