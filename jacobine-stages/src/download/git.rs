//! `download.git`: clone a repository, or update an existing checkout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tracing::info;

use jacobine_core::config::ToolConfig;
use jacobine_core::domain::envelope::{self, CvsanalyEnvelope, DownloadGitEnvelope};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::process::CommandSpec;
use jacobine_queue::{QueueSpec, StageError, StageHandler};

use crate::context::{StageContext, ensure_directory};

pub struct DownloadGit {
    context: Arc<StageContext>,
}

impl DownloadGit {
    pub fn new(context: Arc<StageContext>) -> Self {
        Self { context }
    }

    fn git(&self) -> &ToolConfig {
        &self.context.config.application.git
    }

    async fn update_checkout(&self, checkout: &Path) -> Result<(), StageError> {
        // Probe first: a checkout without a local master is not ours to
        // pull on, and pulling it would touch the network for nothing.
        let probe = self
            .context
            .runner
            .run(
                CommandSpec::new(&self.git().binary)
                    .arg("branch")
                    .current_dir(checkout)
                    .timeout(self.git().timeout()),
            )
            .await?
            .require_success()?;

        if !has_local_master(&probe.stdout) {
            return Err(StageError::Invalid {
                reason: format!(
                    "checkout {} has no local master branch, refusing to pull",
                    checkout.display()
                ),
            });
        }

        self.context
            .runner
            .run(
                CommandSpec::new(&self.git().binary)
                    .arg("pull")
                    .current_dir(checkout)
                    .timeout(self.git().timeout()),
            )
            .await?
            .require_success()?;

        Ok(())
    }

    async fn clone_repository(&self, url: &str, checkout: &Path) -> Result<(), StageError> {
        ensure_directory(checkout).await?;

        self.context
            .runner
            .run(
                CommandSpec::new(&self.git().binary)
                    .args(["clone", "--recursive"])
                    .arg(url)
                    .arg(checkout.display().to_string())
                    .timeout(self.git().timeout()),
            )
            .await?
            .require_success()?;

        Ok(())
    }
}

#[async_trait]
impl StageHandler for DownloadGit {
    fn spec(&self) -> QueueSpec {
        QueueSpec::for_stage(StageName::DownloadGit)
    }

    async fn process(&self, payload: &[u8]) -> Result<(), StageError> {
        let envelope: DownloadGitEnvelope = envelope::decode(payload)?;
        let record = self.context.find_gitweb(envelope.gitweb_id).await?;

        let checkout = self
            .context
            .project
            .git_checkout_path
            .join(checkout_directory_name(&record.name, &record.git));

        if checkout.join(".git").exists() {
            info!(gitweb_id = record.id, checkout = %checkout.display(), "Updating existing checkout");
            self.update_checkout(&checkout).await?;
        } else {
            info!(gitweb_id = record.id, url = %record.git, checkout = %checkout.display(), "Cloning repository");
            self.clone_repository(&record.git, &checkout).await?;
        }

        self.context
            .publish(
                StageName::AnalysisCvsanaly,
                &CvsanalyEnvelope {
                    project: envelope.project.clone(),
                    gitweb_id: record.id,
                    checkout_dir: checkout.clone(),
                },
            )
            .await?;

        info!(gitweb_id = record.id, checkout = %checkout.display(), "Checkout ready");
        Ok(())
    }
}

/// Deterministic checkout directory for a repository.
///
/// The readable part normalizes the catalog name (`/`→`_`, strip a
/// trailing `.git`, `.`→`-`); a short digest of the clone URL is appended
/// so two distinct repositories whose names normalize identically can
/// never alias to the same directory.
pub fn checkout_directory_name(name: &str, url: &str) -> String {
    let base = name.replace('/', "_");
    let base = base.strip_suffix(".git").unwrap_or(&base);
    let base = base.replace('.', "-");

    let digest = Sha1::digest(url.as_bytes());
    format!("{base}-{}", &hex::encode(digest)[..8])
}

/// `git branch` lists local branches, the current one marked with `*`.
pub fn has_local_master(branch_output: &str) -> bool {
    branch_output
        .lines()
        .any(|line| line.trim_start_matches('*').trim() == "master")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_strips_git_suffix() {
        let dir = checkout_directory_name("TYPO3CMS/Core.git", "https://git.example/core.git");
        assert!(dir.starts_with("TYPO3CMS_Core-"));
        assert!(!dir.contains(".git"));
        assert!(!dir.contains('/'));
    }

    #[test]
    fn dots_become_dashes() {
        let dir = checkout_directory_name("ext.news", "https://git.example/news.git");
        assert!(dir.starts_with("ext-news-"));
    }

    // "core" and "core.git" normalize to the same readable base; the URL
    // digest keeps the directories distinct.
    #[test]
    fn distinct_repositories_never_alias() {
        let left = checkout_directory_name("core", "https://git.example/core.git");
        let right = checkout_directory_name("core.git", "https://git.example/legacy/core.git");
        assert_ne!(left, right);
    }

    #[test]
    fn same_repository_is_stable() {
        let first = checkout_directory_name("core", "https://git.example/core.git");
        let second = checkout_directory_name("core", "https://git.example/core.git");
        assert_eq!(first, second);
    }

    #[test]
    fn detects_local_master() {
        assert!(has_local_master("  develop\n* master\n"));
        assert!(has_local_master("* master\n"));
        assert!(!has_local_master("* main\n  develop\n"));
        assert!(!has_local_master(""));
    }
}
