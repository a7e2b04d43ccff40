//! `analysis.phploc`: size and complexity metrics for an extracted release.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use jacobine_core::domain::envelope::{self, AnalysisEnvelope};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::SqlValue;
use jacobine_core::infrastructure::process::CommandSpec;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::StageContext;

/// The subset of phploc's JSON report that is persisted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PhpLocReport {
    pub directories: u64,
    pub files: u64,
    pub loc: u64,
    pub lloc: u64,
    pub cloc: u64,
    pub ncloc: u64,
    pub classes: u64,
    pub methods: u64,
    pub functions: u64,
    pub ccn: u64,
}

/// Parse the report file phploc wrote with `--log-json`.
pub fn parse_report(json: &str) -> Result<PhpLocReport, StageError> {
    serde_json::from_str(json).map_err(|e| StageError::Invalid {
        reason: format!("unreadable phploc report: {e}"),
    })
}

pub struct PhpLoc {
    context: Arc<StageContext>,
}

impl PhpLoc {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }

    async fn store_metrics(
        &self,
        version_id: u64,
        report: &PhpLocReport,
    ) -> Result<(), StageError> {
        let mut gateway = self.context.gateway.lock().await;

        // Replace, not append: redelivery must not duplicate the row.
        gateway
            .delete("phploc_metrics", &[("version_id", SqlValue::from(version_id))])
            .await?;
        gateway
            .insert(
                "phploc_metrics",
                &[
                    ("version_id", SqlValue::from(version_id)),
                    ("directories", SqlValue::from(report.directories)),
                    ("files", SqlValue::from(report.files)),
                    ("loc", SqlValue::from(report.loc)),
                    ("lloc", SqlValue::from(report.lloc)),
                    ("cloc", SqlValue::from(report.cloc)),
                    ("ncloc", SqlValue::from(report.ncloc)),
                    ("classes", SqlValue::from(report.classes)),
                    ("methods", SqlValue::from(report.methods)),
                    ("functions", SqlValue::from(report.functions)),
                    ("ccn", SqlValue::from(report.ccn)),
                ],
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl StageHandler for PhpLoc {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::AnalysisPhploc)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: AnalysisEnvelope = envelope::decode(payload)?;
        let version = self.context.find_version(envelope.version_id).await?;

        if !version.extracted {
            return Err(StageError::Invalid {
                reason: format!("version {} is not extracted yet", version.id),
            });
        }
        if version.analyzed_phploc {
            info!(version_id = version.id, "phploc metrics already recorded, skipping");
            return Ok(());
        }

        let tool = &self.context.config.application.phploc;
        let report_path = envelope.directory.join("phploc.json");

        let mut command = CommandSpec::new(&tool.binary)
            .arg("--count-tests")
            .arg("--log-json")
            .arg(report_path.display().to_string());
        if let Some(pattern) = &tool.file_pattern {
            command = command.arg("--names").arg(pattern);
        }
        command = command
            .arg(envelope.directory.display().to_string())
            .timeout(tool.timeout());

        self.context.runner.run(command).await?.require_success()?;

        let report = read_report(&report_path).await?;
        self.store_metrics(version.id, &report).await?;
        self.context
            .update_version(version.id, &[("analyzed_phploc", SqlValue::from(true))])
            .await?;

        info!(version_id = version.id, loc = report.loc, classes = report.classes, "phploc metrics recorded");
        Ok(())
    }
}

async fn read_report(path: &Path) -> Result<PhpLocReport, StageError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StageError::Filesystem {
            path: path.to_path_buf(),
            source,
        })?;
    parse_report(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_phploc_json_report() {
        let json = r#"{
            "directories": 12,
            "files": 345,
            "loc": 67890,
            "lloc": 23456,
            "cloc": 11111,
            "ncloc": 56789,
            "classes": 210,
            "methods": 1890,
            "functions": 77,
            "ccn": 4321,
            "namespaces": 9
        }"#;
        let report = parse_report(json).unwrap();
        assert_eq!(report.files, 345);
        assert_eq!(report.loc, 67890);
        assert_eq!(report.methods, 1890);
    }

    #[test]
    fn missing_keys_default_to_zero() {
        let report = parse_report(r#"{"files": 3}"#).unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(report.ccn, 0);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            parse_report("not json").unwrap_err(),
            StageError::Invalid { .. }
        ));
    }
}
