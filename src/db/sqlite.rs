//! Embedded single-file backend driver.

use crate::db::dialect::Dialect;
use crate::db::driver::{self, Driver, DriverConnection, ExecOutcome};
use crate::db::params::bind_sqlite_param;
use crate::db::types;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteStatement};
use sqlx::{ConnectOptions, Connection, Executor, Statement};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a writer waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteDriver {
    path: PathBuf,
    options: SqliteConnectOptions,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteDriver {
    /// Driver for the database file at `path`, created on first connect.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        Ok(Self {
            path,
            options,
            runtime: driver::io_runtime()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteLink;

    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn connect(&self) -> DbResult<SqliteLink> {
        let conn = self
            .runtime
            .block_on(self.options.connect())
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to open {}: {}", self.path.display(), e),
                    "Verify the file path exists and is writable",
                )
            })?;
        debug!(path = %self.path.display(), "Opened SQLite connection");
        Ok(SqliteLink {
            conn,
            runtime: Arc::clone(&self.runtime),
        })
    }
}

/// One physical SQLite connection.
pub struct SqliteLink {
    conn: SqliteConnection,
    runtime: Arc<Runtime>,
}

impl DriverConnection for SqliteLink {
    type Compiled = SqliteStatement<'static>;

    fn prepare(&mut self, sql: &str, _returns_keys: bool) -> DbResult<Self::Compiled> {
        let Self { conn, runtime } = self;
        let statement = runtime.block_on((&mut *conn).prepare(sql))?;
        Ok(Statement::to_owned(&statement))
    }

    fn execute(&mut self, compiled: &Self::Compiled, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        let Self { conn, runtime } = self;
        runtime.block_on(async {
            let mut query = compiled.query();
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            let result = query.execute(&mut *conn).await?;
            let last_insert_id = match result.last_insert_rowid() {
                0 => None,
                id => Some(id),
            };
            Ok::<_, DbError>(ExecOutcome {
                rows_affected: result.rows_affected(),
                last_insert_id,
            })
        })
    }

    fn query(&mut self, compiled: &Self::Compiled, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        let Self { conn, runtime } = self;
        let rows = runtime.block_on(async {
            let mut query = compiled.query();
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch_all(&mut *conn).await
        })?;
        rows.iter().map(types::sqlite_row).collect()
    }

    fn is_valid(&mut self) -> bool {
        let Self { conn, runtime } = self;
        matches!(
            runtime.block_on(async { tokio::time::timeout(PING_TIMEOUT, conn.ping()).await }),
            Ok(Ok(()))
        )
    }

    fn close(self) -> DbResult<()> {
        let Self { conn, runtime } = self;
        runtime.block_on(conn.close())?;
        Ok(())
    }
}
