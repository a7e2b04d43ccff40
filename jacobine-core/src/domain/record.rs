//! Work records.
//!
//! A work record is one row in a relational table representing an artifact
//! moving through the pipeline. Rows are created by the producer (or by an
//! earlier stage discovering a new sub-entity), mutated only by the stage
//! that currently owns them, and never deleted: the table is an
//! append/progress log. Progress flags transition 0→1 exactly once.

use sqlx::FromRow;

/// One release of a project, the work record behind `versions`.
#[derive(Debug, Clone, FromRow)]
pub struct Version {
    pub id: u64,
    pub branch: Option<String>,
    pub version: String,
    pub release_date: Option<String>,
    pub release_type: Option<String>,
    pub url_tar: Option<String>,
    pub url_zip: Option<String>,
    pub checksum_tar_md5: Option<String>,
    pub checksum_tar_sha1: Option<String>,
    pub checksum_zip_md5: Option<String>,
    pub checksum_zip_sha1: Option<String>,
    pub downloaded: bool,
    pub extracted: bool,
    pub analyzed_phploc: bool,
    pub analyzed_pdepend: bool,
    pub analyzed_linguist: bool,
    pub path_tar: Option<String>,
    pub path_extracted: Option<String>,
}

/// One repository from the project's catalog, the work record behind
/// `gitweb`.
#[derive(Debug, Clone, FromRow)]
pub struct Gitweb {
    pub id: u64,
    pub name: String,
    /// Clone URL.
    pub git: String,
}
