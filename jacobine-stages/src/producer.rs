//! The seed producer: a one-shot job that reads the upstream release feed,
//! upserts `versions` rows, and emits the initial `download.http` messages.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, info};

use jacobine_core::config::{Config, ProjectSettings};
use jacobine_core::domain::envelope::DownloadHttpEnvelope;
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::{
    DatabaseError, DatabaseGateway, SelectOptions, SqlValue,
};
use jacobine_core::infrastructure::http::{FetchError, HttpFetcher};
use jacobine_queue::{MessageQueue, TransportError};

/// Failures of the one-shot seed run. All are fatal; the job is simply
/// re-run after the cause is fixed.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("release feed is not valid JSON: {0}")]
    Feed(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("driver returned non-numeric insert id '{0}'")]
    InsertId(String),
}

/// Counters reported after a seed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub inserted: u64,
    pub republished: u64,
    pub skipped: u64,
}

/// One branch entry of the feed. Bookkeeping keys (`latest_stable` and
/// friends) hold plain strings and fail to deserialize into this shape,
/// which is exactly how they are skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchEntry {
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub version: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "type", default)]
    pub release_type: Option<String>,
    #[serde(default)]
    pub url: ReleaseUrls,
    #[serde(default)]
    pub checksums: ReleaseChecksums,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseUrls {
    #[serde(default)]
    pub tar: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseChecksums {
    #[serde(default)]
    pub tar: ChecksumPair,
    #[serde(default)]
    pub zip: ChecksumPair,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChecksumPair {
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

/// Split the feed into branch entries, dropping bookkeeping keys and
/// branches without releases.
pub fn parse_feed(body: &[u8]) -> Result<Vec<(String, BranchEntry)>, serde_json::Error> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(body)?;
    Ok(raw
        .into_iter()
        .filter_map(|(branch, value)| {
            serde_json::from_value::<BranchEntry>(value)
                .ok()
                .filter(|entry| !entry.releases.is_empty())
                .map(|entry| (branch, entry))
        })
        .collect())
}

/// Development snapshots are rebuilt in place upstream; their checksums
/// are not stable, so they never enter the pipeline.
pub fn is_snapshot(release: &Release) -> bool {
    release
        .url
        .tar
        .as_deref()
        .is_some_and(|url| url.contains("snapshot"))
}

pub struct Producer {
    project_name: String,
    project: ProjectSettings,
    request_timeout: std::time::Duration,
    gateway: DatabaseGateway,
    queue: MessageQueue,
    fetcher: HttpFetcher,
}

impl Producer {
    pub fn new(
        config: &Config,
        project_name: impl Into<String>,
        project: ProjectSettings,
        gateway: DatabaseGateway,
        queue: MessageQueue,
        fetcher: HttpFetcher,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            project,
            request_timeout: config.various.requests.timeout(),
            gateway,
            queue,
            fetcher,
        }
    }

    pub async fn run(&mut self) -> Result<ProducerReport, ProducerError> {
        info!(project = %self.project_name, url = %self.project.feed.url, "Fetching release feed");

        // The seed job may run before any consumer has declared topology.
        self.queue.declare_exchange(&self.project.exchange).await?;

        let fetched = self
            .fetcher
            .get(&self.project.feed.url, self.request_timeout)
            .await?;
        let branches = parse_feed(&fetched.body)?;

        let mut report = ProducerReport::default();
        for (branch, entry) in branches {
            debug!(branch = %branch, releases = entry.releases.len(), "Processing branch");
            for release in entry.releases {
                self.handle_release(&branch, release, &mut report).await?;
            }
        }

        info!(
            project = %self.project_name,
            inserted = report.inserted,
            republished = report.republished,
            skipped = report.skipped,
            "Seed run finished"
        );
        Ok(report)
    }

    async fn handle_release(
        &mut self,
        branch: &str,
        release: Release,
        report: &mut ProducerReport,
    ) -> Result<(), ProducerError> {
        if is_snapshot(&release) {
            debug!(version = %release.version, "Skipping snapshot release");
            report.skipped += 1;
            return Ok(());
        }

        let rows = self
            .gateway
            .select(
                "versions",
                &["id", "downloaded"],
                &[("version", SqlValue::from(release.version.as_str()))],
                &SelectOptions::default(),
            )
            .await?;

        let version_id = match rows.first() {
            None => {
                let id = self.insert_release(branch, &release).await?;
                report.inserted += 1;
                id
            }
            Some(row) => {
                use sqlx::Row;
                let id: u64 = row.try_get("id").map_err(row_error)?;
                let downloaded: bool = row.try_get("downloaded").map_err(row_error)?;
                if downloaded {
                    debug!(version = %release.version, "Release already downloaded, skipping");
                    report.skipped += 1;
                    return Ok(());
                }
                report.republished += 1;
                id
            }
        };

        self.queue
            .publish(
                &self.project.exchange,
                StageName::DownloadHttp.routing_key(),
                &DownloadHttpEnvelope {
                    project: self.project_name.clone(),
                    version_id,
                    filename_prefix: self.project.feed.filename_prefix.clone(),
                    filename_postfix: self.project.feed.filename_postfix.clone(),
                },
            )
            .await?;

        Ok(())
    }

    async fn insert_release(
        &mut self,
        branch: &str,
        release: &Release,
    ) -> Result<u64, ProducerError> {
        let id = self
            .gateway
            .insert(
                "versions",
                &[
                    ("branch", SqlValue::from(branch)),
                    ("version", SqlValue::from(release.version.as_str())),
                    ("release_date", SqlValue::from(release.date.clone())),
                    ("release_type", SqlValue::from(release.release_type.clone())),
                    ("url_tar", SqlValue::from(release.url.tar.clone())),
                    ("url_zip", SqlValue::from(release.url.zip.clone())),
                    (
                        "checksum_tar_md5",
                        SqlValue::from(release.checksums.tar.md5.clone()),
                    ),
                    (
                        "checksum_tar_sha1",
                        SqlValue::from(release.checksums.tar.sha1.clone()),
                    ),
                    (
                        "checksum_zip_md5",
                        SqlValue::from(release.checksums.zip.md5.clone()),
                    ),
                    (
                        "checksum_zip_sha1",
                        SqlValue::from(release.checksums.zip.sha1.clone()),
                    ),
                    ("downloaded", SqlValue::from(false)),
                ],
            )
            .await?;

        info!(version = %release.version, id = %id, "New release recorded");
        id.parse::<u64>().map_err(|_| ProducerError::InsertId(id))
    }
}

fn row_error(e: sqlx::Error) -> DatabaseError {
    DatabaseError::Driver {
        code: None,
        message: format!("failed to decode row: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"{
        "latest_stable": "6.2.0",
        "latest_lts": "6.2.0",
        "latest_deprecated": "4.5.40",
        "6.2": {
            "releases": [
                {
                    "version": "6.2.0",
                    "date": "2014-03-25 10:22:34 UTC",
                    "type": "release",
                    "url": {
                        "tar": "http://get.example/6.2.0/t.tar.gz",
                        "zip": "http://get.example/6.2.0/t.zip"
                    },
                    "checksums": {
                        "tar": { "md5": "aaa", "sha1": "bbb" },
                        "zip": { "md5": "ccc", "sha1": "ddd" }
                    }
                },
                {
                    "version": "6.2.1-snapshot",
                    "url": { "tar": "http://get.example/snapshot/t.tar.gz" }
                }
            ]
        },
        "6.1": {
            "releases": []
        }
    }"#;

    #[test]
    fn bookkeeping_keys_and_empty_branches_are_dropped() {
        let branches = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].0, "6.2");
        assert_eq!(branches[0].1.releases.len(), 2);
    }

    #[test]
    fn release_fields_survive_parsing() {
        let branches = parse_feed(FEED.as_bytes()).unwrap();
        let release = &branches[0].1.releases[0];
        assert_eq!(release.version, "6.2.0");
        assert_eq!(
            release.url.tar.as_deref(),
            Some("http://get.example/6.2.0/t.tar.gz")
        );
        assert_eq!(release.checksums.tar.md5.as_deref(), Some("aaa"));
        assert_eq!(release.checksums.tar.sha1.as_deref(), Some("bbb"));
        assert_eq!(release.release_type.as_deref(), Some("release"));
    }

    #[test]
    fn snapshot_urls_are_flagged() {
        let branches = parse_feed(FEED.as_bytes()).unwrap();
        assert!(!is_snapshot(&branches[0].1.releases[0]));
        assert!(is_snapshot(&branches[0].1.releases[1]));
    }

    #[test]
    fn feed_that_is_not_json_fails() {
        assert!(parse_feed(b"<html>503</html>").is_err());
    }

    #[test]
    fn release_without_tar_url_is_not_a_snapshot() {
        let release = Release {
            version: "1.0".to_string(),
            date: None,
            release_type: None,
            url: ReleaseUrls::default(),
            checksums: ReleaseChecksums::default(),
        };
        assert!(!is_snapshot(&release));
    }
}
