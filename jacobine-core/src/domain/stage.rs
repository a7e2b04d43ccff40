//! Stage identifiers.
//!
//! The pipeline topology is static: every stage is one node of the analysis
//! DAG, identified by its dotted routing key. Queues are named after the
//! routing key they bind on.

use std::fmt;
use std::str::FromStr;

/// The closed set of pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    DownloadHttp,
    DownloadGit,
    ExtractTargz,
    AnalysisCvsanaly,
    AnalysisPhploc,
    AnalysisPdepend,
    AnalysisGithubLinguist,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        StageName::DownloadHttp,
        StageName::DownloadGit,
        StageName::ExtractTargz,
        StageName::AnalysisCvsanaly,
        StageName::AnalysisPhploc,
        StageName::AnalysisPdepend,
        StageName::AnalysisGithubLinguist,
    ];

    /// The routing key this stage binds and publishes on.
    pub fn routing_key(self) -> &'static str {
        match self {
            StageName::DownloadHttp => "download.http",
            StageName::DownloadGit => "download.git",
            StageName::ExtractTargz => "extract.targz",
            StageName::AnalysisCvsanaly => "analysis.cvsanaly",
            StageName::AnalysisPhploc => "analysis.phploc",
            StageName::AnalysisPdepend => "analysis.pdepend",
            StageName::AnalysisGithubLinguist => "analysis.github.linguist",
        }
    }

    /// Queue names equal routing keys throughout the topology.
    pub fn queue_name(self) -> &'static str {
        self.routing_key()
    }

    /// Resolve an analyzer token from the per-project `analyzers` list to
    /// the analysis stage it fans out to.
    pub fn from_analyzer_token(token: &str) -> Option<StageName> {
        match token {
            "cvsanaly" => Some(StageName::AnalysisCvsanaly),
            "phploc" => Some(StageName::AnalysisPhploc),
            "pdepend" => Some(StageName::AnalysisPdepend),
            "github-linguist" => Some(StageName::AnalysisGithubLinguist),
            _ => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for StageName {
    type Err = UnknownStage;

    /// Accepts both the routing key form (`download.http`) and the
    /// CLI-friendly kebab form (`download-http`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', ".");
        // `analysis.github.linguist` would kebab to `analysis-github-linguist`.
        StageName::ALL
            .into_iter()
            .find(|stage| stage.routing_key() == normalized)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// A stage name that is not part of the pipeline.
#[derive(Debug, thiserror::Error)]
#[error("unknown stage '{0}'")]
pub struct UnknownStage(pub String);
