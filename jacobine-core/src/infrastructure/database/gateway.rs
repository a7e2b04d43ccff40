//! Prepared-statement CRUD over one MySQL connection.
//!
//! The gateway is the sole owner of the live connection handle. It is not
//! safe for concurrent use by multiple workers; every consumer process
//! opens exactly one gateway. After a statement fails with a "server gone
//! away" class error the gateway re-establishes the connection from its
//! cached settings and retries the statement exactly once. No other layer
//! retries database errors.

use sqlx::Connection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlQueryResult, MySqlRow};
use tracing::{debug, warn};

use crate::config::MySqlConfig;

/// Cached credentials used for the initial connect and for transparent
/// reconnects.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl ConnectionSettings {
    /// Combine the server-wide MySQL section with a project's database name.
    pub fn from_config(mysql: &MySqlConfig, database: &str) -> Self {
        Self {
            host: mysql.host.clone(),
            port: mysql.port,
            username: mysql.username.clone(),
            password: mysql.password.clone(),
            database: database.to_string(),
        }
    }

    /// The single source of connect options. Both the initial connect and
    /// the reconnect path go through here, so host and port cannot end up
    /// in swapped positions on one of the two paths.
    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
    }
}

/// A bindable statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::UInt(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Optional clauses for [`DatabaseGateway::select`].
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
}

/// Calls rejected before any SQL is built.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("empty table name")]
    EmptyTable,

    #[error("{operation} requires a non-empty value map")]
    EmptyValues { operation: &'static str },

    #[error("{operation} requires a non-empty predicate")]
    EmptyPredicate { operation: &'static str },
}

/// Database failures surfaced to stage handlers.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("driver error (code {code:?}): {message}")]
    Driver {
        code: Option<String>,
        message: String,
    },

    #[error("connection failed: {0}")]
    Connect(#[source] sqlx::Error),
}

/// One prepared-statement CRUD gateway per consumer process.
pub struct DatabaseGateway {
    settings: ConnectionSettings,
    connection: MySqlConnection,
}

impl DatabaseGateway {
    /// Open the connection and cache the settings for reconnects.
    pub async fn connect(settings: ConnectionSettings) -> Result<Self, DatabaseError> {
        let connection = Self::open(&settings).await?;
        Ok(Self {
            settings,
            connection,
        })
    }

    async fn open(settings: &ConnectionSettings) -> Result<MySqlConnection, DatabaseError> {
        MySqlConnection::connect_with(&settings.connect_options())
            .await
            .map_err(DatabaseError::Connect)
    }

    /// SELECT with a conjunctive AND equality predicate.
    pub async fn select(
        &mut self,
        table: &str,
        columns: &[&str],
        where_eq: &[(&str, SqlValue)],
        options: &SelectOptions,
    ) -> Result<Vec<MySqlRow>, DatabaseError> {
        let (sql, binds) = build_select(table, columns, where_eq, options)?;
        self.fetch_with_retry(&sql, &binds).await
    }

    /// INSERT one row; returns the driver-assigned id as a string.
    pub async fn insert(
        &mut self,
        table: &str,
        values: &[(&str, SqlValue)],
    ) -> Result<String, DatabaseError> {
        let (sql, binds) = build_insert(table, values)?;
        let result = self.execute_with_retry(&sql, &binds).await?;
        Ok(result.last_insert_id().to_string())
    }

    /// UPDATE rows matching the predicate; returns the affected row count.
    pub async fn update(
        &mut self,
        table: &str,
        values: &[(&str, SqlValue)],
        where_eq: &[(&str, SqlValue)],
    ) -> Result<u64, DatabaseError> {
        let (sql, binds) = build_update(table, values, where_eq)?;
        let result = self.execute_with_retry(&sql, &binds).await?;
        Ok(result.rows_affected())
    }

    /// DELETE rows matching the predicate; returns the affected row count.
    pub async fn delete(
        &mut self,
        table: &str,
        where_eq: &[(&str, SqlValue)],
    ) -> Result<u64, DatabaseError> {
        let (sql, binds) = build_delete(table, where_eq)?;
        let result = self.execute_with_retry(&sql, &binds).await?;
        Ok(result.rows_affected())
    }

    async fn execute_with_retry(
        &mut self,
        sql: &str,
        binds: &[SqlValue],
    ) -> Result<MySqlQueryResult, DatabaseError> {
        match self.try_execute(sql, binds).await {
            Ok(result) => Ok(result),
            Err(e) if is_connection_lost(&e) => {
                warn!(error = %e, "Connection to MySQL lost, reconnecting once");
                self.connection = Self::open(&self.settings).await?;
                self.try_execute(sql, binds).await.map_err(driver_error)
            }
            Err(e) => Err(driver_error(e)),
        }
    }

    async fn fetch_with_retry(
        &mut self,
        sql: &str,
        binds: &[SqlValue],
    ) -> Result<Vec<MySqlRow>, DatabaseError> {
        match self.try_fetch(sql, binds).await {
            Ok(rows) => Ok(rows),
            Err(e) if is_connection_lost(&e) => {
                warn!(error = %e, "Connection to MySQL lost, reconnecting once");
                self.connection = Self::open(&self.settings).await?;
                self.try_fetch(sql, binds).await.map_err(driver_error)
            }
            Err(e) => Err(driver_error(e)),
        }
    }

    async fn try_execute(
        &mut self,
        sql: &str,
        binds: &[SqlValue],
    ) -> Result<MySqlQueryResult, sqlx::Error> {
        debug!(sql, params = binds.len(), "Executing statement");
        bind_all(sqlx::query(sql), binds)
            .execute(&mut self.connection)
            .await
    }

    async fn try_fetch(&mut self, sql: &str, binds: &[SqlValue]) -> Result<Vec<MySqlRow>, sqlx::Error> {
        debug!(sql, params = binds.len(), "Executing query");
        bind_all(sqlx::query(sql), binds)
            .fetch_all(&mut self.connection)
            .await
    }
}

fn bind_all<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    binds: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    binds.iter().fold(query, |query, value| match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::UInt(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
    })
}

/// The "server has gone away" error class that triggers the one-shot
/// reconnect: transport-level IO failures, or MySQL client codes 2006
/// (CR_SERVER_GONE_ERROR) and 2013 (CR_SERVER_LOST).
fn is_connection_lost(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("2006") | Some("2013")),
        _ => false,
    }
}

fn driver_error(e: sqlx::Error) -> DatabaseError {
    match e {
        sqlx::Error::Database(db) => DatabaseError::Driver {
            code: db.code().map(|c| c.into_owned()),
            message: db.message().to_string(),
        },
        other => DatabaseError::Driver {
            code: None,
            message: other.to_string(),
        },
    }
}

fn quote(identifier: &str) -> String {
    format!("`{identifier}`")
}

fn build_where(where_eq: &[(&str, SqlValue)], binds: &mut Vec<SqlValue>) -> String {
    let clauses: Vec<String> = where_eq
        .iter()
        .map(|(column, value)| {
            if *value == SqlValue::Null {
                format!("{} IS NULL", quote(column))
            } else {
                binds.push(value.clone());
                format!("{} = ?", quote(column))
            }
        })
        .collect();
    clauses.join(" AND ")
}

fn build_select(
    table: &str,
    columns: &[&str],
    where_eq: &[(&str, SqlValue)],
    options: &SelectOptions,
) -> Result<(String, Vec<SqlValue>), UsageError> {
    if table.is_empty() {
        return Err(UsageError::EmptyTable);
    }

    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.iter().copied().map(quote_projection).collect::<Vec<_>>().join(", ")
    };

    let mut binds = Vec::new();
    let mut sql = format!("SELECT {projection} FROM {}", quote(table));
    if !where_eq.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&build_where(where_eq, &mut binds));
    }
    if let Some(group_by) = &options.group_by {
        sql.push_str(" GROUP BY ");
        sql.push_str(group_by);
    }
    if let Some(order_by) = &options.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    if let Some(limit) = &options.limit {
        sql.push_str(" LIMIT ");
        sql.push_str(limit);
    }

    Ok((sql, binds))
}

fn quote_projection(column: &str) -> String {
    if column == "*" {
        column.to_string()
    } else {
        quote(column)
    }
}

fn build_insert(
    table: &str,
    values: &[(&str, SqlValue)],
) -> Result<(String, Vec<SqlValue>), UsageError> {
    if table.is_empty() {
        return Err(UsageError::EmptyTable);
    }
    if values.is_empty() {
        return Err(UsageError::EmptyValues {
            operation: "insert",
        });
    }

    let columns: Vec<String> = values.iter().map(|(column, _)| quote(column)).collect();
    let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
    let binds: Vec<SqlValue> = values.iter().map(|(_, value)| value.clone()).collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        columns.join(", "),
        placeholders.join(", ")
    );

    Ok((sql, binds))
}

fn build_update(
    table: &str,
    values: &[(&str, SqlValue)],
    where_eq: &[(&str, SqlValue)],
) -> Result<(String, Vec<SqlValue>), UsageError> {
    if table.is_empty() {
        return Err(UsageError::EmptyTable);
    }
    if values.is_empty() {
        return Err(UsageError::EmptyValues {
            operation: "update",
        });
    }
    if where_eq.is_empty() {
        return Err(UsageError::EmptyPredicate {
            operation: "update",
        });
    }

    let assignments: Vec<String> = values
        .iter()
        .map(|(column, _)| format!("{} = ?", quote(column)))
        .collect();
    let mut binds: Vec<SqlValue> = values.iter().map(|(_, value)| value.clone()).collect();

    let mut sql = format!(
        "UPDATE {} SET {} WHERE ",
        quote(table),
        assignments.join(", ")
    );
    sql.push_str(&build_where(where_eq, &mut binds));

    Ok((sql, binds))
}

fn build_delete(
    table: &str,
    where_eq: &[(&str, SqlValue)],
) -> Result<(String, Vec<SqlValue>), UsageError> {
    if table.is_empty() {
        return Err(UsageError::EmptyTable);
    }
    if where_eq.is_empty() {
        return Err(UsageError::EmptyPredicate {
            operation: "delete",
        });
    }

    let mut binds = Vec::new();
    let mut sql = format!("DELETE FROM {} WHERE ", quote(table));
    sql.push_str(&build_where(where_eq, &mut binds));

    Ok((sql, binds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_all_columns_without_predicate() {
        let (sql, binds) = build_select("versions", &[], &[], &SelectOptions::default()).unwrap();
        assert_eq!(sql, "SELECT * FROM `versions`");
        assert!(binds.is_empty());
    }

    #[test]
    fn select_with_predicate_and_clauses() {
        let options = SelectOptions {
            order_by: Some("id DESC".to_string()),
            limit: Some("1".to_string()),
            ..SelectOptions::default()
        };
        let (sql, binds) = build_select(
            "versions",
            &["id", "version"],
            &[("version", SqlValue::from("6.2.0")), ("downloaded", SqlValue::from(false))],
            &options,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT `id`, `version` FROM `versions` WHERE `version` = ? AND `downloaded` = ? ORDER BY id DESC LIMIT 1"
        );
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn null_predicate_renders_is_null_without_bind() {
        let (sql, binds) =
            build_select("versions", &[], &[("path_tar", SqlValue::Null)], &SelectOptions::default())
                .unwrap();
        assert_eq!(sql, "SELECT * FROM `versions` WHERE `path_tar` IS NULL");
        assert!(binds.is_empty());
    }

    #[test]
    fn insert_binds_values_in_column_order() {
        let (sql, binds) = build_insert(
            "versions",
            &[
                ("version", SqlValue::from("6.2.0")),
                ("downloaded", SqlValue::from(false)),
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `versions` (`version`, `downloaded`) VALUES (?, ?)"
        );
        assert_eq!(binds[0], SqlValue::Text("6.2.0".to_string()));
        assert_eq!(binds[1], SqlValue::Bool(false));
    }

    #[test]
    fn update_appends_predicate_binds_after_assignments() {
        let (sql, binds) = build_update(
            "versions",
            &[("downloaded", SqlValue::from(true))],
            &[("id", SqlValue::from(7u64))],
        )
        .unwrap();
        assert_eq!(sql, "UPDATE `versions` SET `downloaded` = ? WHERE `id` = ?");
        assert_eq!(binds, vec![SqlValue::Bool(true), SqlValue::UInt(7)]);
    }

    #[test]
    fn delete_requires_predicate() {
        let (sql, _) = build_delete("linguist_results", &[("version_id", SqlValue::from(7u64))]).unwrap();
        assert_eq!(sql, "DELETE FROM `linguist_results` WHERE `version_id` = ?");

        assert_eq!(
            build_delete("linguist_results", &[]).unwrap_err(),
            UsageError::EmptyPredicate {
                operation: "delete"
            }
        );
    }

    #[test]
    fn empty_inputs_are_rejected_before_sql_is_built() {
        assert_eq!(
            build_select("", &[], &[], &SelectOptions::default()).unwrap_err(),
            UsageError::EmptyTable
        );
        assert_eq!(
            build_insert("versions", &[]).unwrap_err(),
            UsageError::EmptyValues {
                operation: "insert"
            }
        );
        assert_eq!(
            build_update("versions", &[], &[("id", SqlValue::from(1u64))]).unwrap_err(),
            UsageError::EmptyValues {
                operation: "update"
            }
        );
    }

    // The upstream system this pipeline replaces passed the host value in
    // the port position when re-opening a dropped connection. Both connect
    // paths here share `connect_options`; this pins the field mapping.
    #[test]
    fn reconnect_options_carry_host_and_port_in_correct_positions() {
        let settings = ConnectionSettings {
            host: "db.internal".to_string(),
            port: 3307,
            username: "jacobine".to_string(),
            password: "secret".to_string(),
            database: "typo3_analysis".to_string(),
        };
        let options = format!("{:?}", settings.connect_options());
        assert!(options.contains("db.internal"));
        assert!(options.contains("3307"));
        assert!(!options.contains("port: 0"));
        assert!(options.contains("typo3_analysis"));
    }

    #[test]
    fn transport_io_errors_are_classified_as_connection_loss() {
        let lost = sqlx::Error::from(std::io::Error::other("connection reset by peer"));
        assert!(is_connection_lost(&lost));

        assert!(!is_connection_lost(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn option_values_collapse_to_null() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(
            SqlValue::from(Some("x".to_string())),
            SqlValue::Text("x".to_string())
        );
    }
}
