//! Networked backend driver (MySQL, includes MariaDB).

use crate::config::NetworkedConfig;
use crate::db::dialect::Dialect;
use crate::db::driver::{self, Driver, DriverConnection, ExecOutcome};
use crate::db::params::bind_mysql_param;
use crate::db::types;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlStatement};
use sqlx::{ConnectOptions, Connection, Executor, Statement};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

/// Timeout of the liveness check.
const PING_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MySqlDriver {
    options: MySqlConnectOptions,
    runtime: Arc<Runtime>,
}

impl std::fmt::Debug for MySqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlDriver").finish_non_exhaustive()
    }
}

impl MySqlDriver {
    pub fn new(config: &NetworkedConfig) -> DbResult<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4");
        Ok(Self {
            options,
            runtime: driver::io_runtime()?,
        })
    }
}

impl Driver for MySqlDriver {
    type Connection = MySqlLink;

    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn connect(&self) -> DbResult<MySqlLink> {
        let conn = self
            .runtime
            .block_on(self.options.connect())
            .map_err(|e| {
                DbError::connection(format!("Failed to connect: {}", e), connection_suggestion(&e))
            })?;
        debug!("Opened MySQL connection");
        Ok(MySqlLink {
            conn,
            runtime: Arc::clone(&self.runtime),
        })
    }
}

/// One physical MySQL connection.
pub struct MySqlLink {
    conn: MySqlConnection,
    runtime: Arc<Runtime>,
}

impl DriverConnection for MySqlLink {
    type Compiled = MySqlStatement<'static>;

    // MySQL reports the generated key of every insert; the flag needs no
    // special preparation.
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
                query = bind_mysql_param(query, param);
            }
            let result = query.execute(&mut *conn).await?;
            Ok::<_, DbError>(ExecOutcome {
                rows_affected: result.rows_affected(),
                last_insert_id: generated_key(result.last_insert_id())?,
            })
        })
    }

    fn query(&mut self, compiled: &Self::Compiled, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        let Self { conn, runtime } = self;
        let rows = runtime.block_on(async {
            let mut query = compiled.query();
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch_all(&mut *conn).await
        })?;
        rows.iter().map(types::mysql_row).collect()
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

/// MySQL reports 0 when no key was generated.
fn generated_key(id: u64) -> DbResult<Option<i64>> {
    match id {
        0 => Ok(None),
        id => i64::try_from(id).map(Some).map_err(|_| {
            DbError::database(
                format!("Generated key {id} exceeds the signed 64-bit range"),
                None,
                "Use a signed BIGINT key column",
            )
        }),
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the MySQL server is running and accessible".to_string();
    }

    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify user and password in mysql.properties".to_string();
    }

    if error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration of the server".to_string();
    }

    "Verify host, port and database in mysql.properties".to_string()
}
