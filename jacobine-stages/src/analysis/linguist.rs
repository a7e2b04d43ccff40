//! `analysis.github.linguist`: language breakdown of an extracted release.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use jacobine_core::domain::envelope::{self, AnalysisEnvelope};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::SqlValue;
use jacobine_core::infrastructure::process::CommandSpec;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::StageContext;

/// One line of linguist's breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageShare {
    pub percentage: f64,
    pub language: String,
}

/// Parse linguist's stdout.
///
/// Both output flavors are accepted: `98.29% PHP` and the newer
/// `98.29%  123456  PHP`. Language names can contain spaces.
pub fn parse_breakdown(stdout: &str) -> Vec<LanguageShare> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let percentage: f64 = tokens.next()?.strip_suffix('%')?.parse().ok()?;

            let rest: Vec<&str> = tokens.collect();
            let language = match rest.split_first() {
                Some((first, tail)) if first.parse::<u64>().is_ok() => tail.join(" "),
                _ => rest.join(" "),
            };
            if language.is_empty() {
                return None;
            }

            Some(LanguageShare {
                percentage,
                language,
            })
        })
        .collect()
}

pub struct GithubLinguist {
    context: Arc<StageContext>,
}

impl GithubLinguist {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl StageHandler for GithubLinguist {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::AnalysisGithubLinguist)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: AnalysisEnvelope = envelope::decode(payload)?;
        let version = self.context.find_version(envelope.version_id).await?;

        if !version.extracted {
            return Err(StageError::Invalid {
                reason: format!("version {} is not extracted yet", version.id),
            });
        }
        if version.analyzed_linguist {
            info!(version_id = version.id, "Language breakdown already recorded, skipping");
            return Ok(());
        }

        let tool = &self.context.config.application.github_linguist;
        let report = self
            .context
            .runner
            .run(
                CommandSpec::new(&tool.binary)
                    .arg(envelope.directory.display().to_string())
                    .timeout(tool.timeout()),
            )
            .await?
            .require_success()?;

        let breakdown = parse_breakdown(&report.stdout);
        if breakdown.is_empty() {
            return Err(StageError::Invalid {
                reason: format!(
                    "linguist produced no language breakdown for {}",
                    envelope.directory.display()
                ),
            });
        }

        let mut gateway = self.context.gateway.lock().await;
        gateway
            .delete(
                "linguist_results",
                &[("version_id", SqlValue::from(version.id))],
            )
            .await?;
        for share in &breakdown {
            gateway
                .insert(
                    "linguist_results",
                    &[
                        ("version_id", SqlValue::from(version.id)),
                        ("percentage", SqlValue::from(share.percentage)),
                        ("language", SqlValue::from(share.language.as_str())),
                    ],
                )
                .await?;
        }
        drop(gateway);

        self.context
            .update_version(version.id, &[("analyzed_linguist", SqlValue::from(true))])
            .await?;

        info!(version_id = version.id, languages = breakdown.len(), "Language breakdown recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percent_language_lines() {
        let breakdown = parse_breakdown("53.01% PHP\n31.20% JavaScript\n15.79% CSS\n");
        assert_eq!(breakdown.len(), 3);
        assert_eq!(breakdown[0].percentage, 53.01);
        assert_eq!(breakdown[0].language, "PHP");
        assert_eq!(breakdown[2].language, "CSS");
    }

    #[test]
    fn parses_byte_count_flavor_and_spaced_names() {
        let breakdown = parse_breakdown("98.29%  1234567  Visual Basic\n1.71%  2048  PHP\n");
        assert_eq!(breakdown[0].language, "Visual Basic");
        assert_eq!(breakdown[1].percentage, 1.71);
    }

    #[test]
    fn ignores_noise_lines() {
        let breakdown = parse_breakdown("warning: deprecated flag\n100.00% PHP\n\n");
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown[0].language, "PHP");
    }

    #[test]
    fn empty_output_yields_empty_breakdown() {
        assert!(parse_breakdown("").is_empty());
    }
}
