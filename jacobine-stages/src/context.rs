//! Shared dependencies and record access for stage handlers.

use std::sync::Arc;

use serde::Serialize;
use sqlx::FromRow;
use sqlx::mysql::MySqlRow;
use tokio::sync::Mutex;

use jacobine_core::config::{Config, ProjectSettings};
use jacobine_core::domain::record::{Gitweb, Version};
use jacobine_core::domain::stage::StageName;
use jacobine_core::infrastructure::database::{
    DatabaseError, DatabaseGateway, SelectOptions, SqlValue,
};
use jacobine_core::infrastructure::http::HttpFetcher;
use jacobine_core::infrastructure::process::ProcessRunner;
use jacobine_queue::{MessageQueue, StageError};

/// Everything a stage handler needs: configuration, the resolved project,
/// and the gateways. One context per consumer process; the gateway sits
/// behind a mutex because the prefetch-1 loop is the only caller.
pub struct StageContext {
    pub config: Arc<Config>,
    pub project_name: String,
    pub project: ProjectSettings,
    pub gateway: Mutex<DatabaseGateway>,
    pub queue: Arc<MessageQueue>,
    pub runner: ProcessRunner,
    pub fetcher: HttpFetcher,
}

impl StageContext {
    /// Load a `versions` row by id; a missing row is poison.
    pub async fn find_version(&self, id: u64) -> Result<Version, StageError> {
        let rows = self
            .gateway
            .lock()
            .await
            .select(
                "versions",
                &[],
                &[("id", SqlValue::from(id))],
                &SelectOptions::default(),
            )
            .await?;
        match rows.first() {
            Some(row) => decode_row(row),
            None => Err(StageError::NotFound {
                table: "versions",
                id,
            }),
        }
    }

    /// Load a `gitweb` row by id; a missing row is poison.
    pub async fn find_gitweb(&self, id: u64) -> Result<Gitweb, StageError> {
        let rows = self
            .gateway
            .lock()
            .await
            .select(
                "gitweb",
                &[],
                &[("id", SqlValue::from(id))],
                &SelectOptions::default(),
            )
            .await?;
        match rows.first() {
            Some(row) => decode_row(row),
            None => Err(StageError::NotFound { table: "gitweb", id }),
        }
    }

    /// Flip progress flags / derived columns on a `versions` row.
    pub async fn update_version(
        &self,
        id: u64,
        values: &[(&str, SqlValue)],
    ) -> Result<(), StageError> {
        self.gateway
            .lock()
            .await
            .update("versions", values, &[("id", SqlValue::from(id))])
            .await?;
        Ok(())
    }

    /// Publish a follow-on message on the project's exchange. Publish
    /// failures requeue the inbound message rather than dead-lettering it.
    pub async fn publish<T: Serialize>(
        &self,
        stage: StageName,
        message: &T,
    ) -> Result<(), StageError> {
        self.queue
            .publish(&self.project.exchange, stage.routing_key(), message)
            .await
            .map_err(StageError::Publish)
    }
}

fn decode_row<T: for<'r> FromRow<'r, MySqlRow>>(row: &MySqlRow) -> Result<T, StageError> {
    T::from_row(row).map_err(|e| {
        StageError::Database(DatabaseError::Driver {
            code: None,
            message: format!("failed to decode row: {e}"),
        })
    })
}

/// `create_dir_all` with the stage error shape.
pub async fn ensure_directory(path: &std::path::Path) -> Result<(), StageError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| StageError::Filesystem {
            path: path.to_path_buf(),
            source,
        })
}
