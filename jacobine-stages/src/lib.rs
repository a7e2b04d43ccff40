//! Jacobine Stages - The nodes of the analysis DAG
//!
//! Each stage is one concrete [`jacobine_queue::StageHandler`]; the edges
//! between stages are routing keys. All handlers share a template: load the
//! work record, check its precondition flag, do the external work, update
//! the record, publish the follow-on message, acknowledge.
//!
//! The topology is static. Stages form a closed set registered in
//! [`build_stage`], keyed by [`StageName`]:
//!
//! ```text
//! producer ──▶ download.http ──▶ extract.targz ──▶ analysis.phploc
//!                                              ├─▶ analysis.pdepend
//!                                              └─▶ analysis.github.linguist
//!              download.git ───▶ analysis.cvsanaly
//! ```

pub mod analysis;
pub mod context;
pub mod download;
pub mod extract;
pub mod producer;

use std::sync::Arc;

use jacobine_core::domain::stage::StageName;
use jacobine_queue::StageHandler;

use crate::context::StageContext;

/// Resolve a stage name to its handler. The set is closed; every stage the
/// CLI can name has exactly one entry here.
pub fn build_stage(stage: StageName, context: Arc<StageContext>) -> Box<dyn StageHandler> {
    match stage {
        StageName::DownloadHttp => Box::new(download::http::DownloadHttp::new(context)),
        StageName::DownloadGit => Box::new(download::git::DownloadGit::new(context)),
        StageName::ExtractTargz => Box::new(extract::targz::ExtractTargz::new(context)),
        StageName::AnalysisCvsanaly => Box::new(analysis::cvsanaly::Cvsanaly::new(context)),
        StageName::AnalysisPhploc => Box::new(analysis::phploc::PhpLoc::new(context)),
        StageName::AnalysisPdepend => Box::new(analysis::pdepend::PDepend::new(context)),
        StageName::AnalysisGithubLinguist => {
            Box::new(analysis::linguist::GithubLinguist::new(context))
        }
    }
}
