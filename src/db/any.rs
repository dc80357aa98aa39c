//! Runtime-selected backend.
//!
//! The backend is chosen from configuration at startup, so the concrete
//! drivers are wrapped in enums that dispatch to the variant in use.

use crate::config::BackendConfig;
use crate::db::dialect::Dialect;
use crate::db::driver::{Driver, DriverConnection, ExecOutcome};
use crate::db::mysql::{MySqlDriver, MySqlLink};
use crate::db::sqlite::{SqliteDriver, SqliteLink};
use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use crate::{impl_backend_dispatch, impl_paired_dispatch};

#[derive(Debug)]
pub enum AnyDriver {
    MySql(MySqlDriver),
    SQLite(SqliteDriver),
}

impl AnyDriver {
    /// Build the driver for the resolved backend.
    pub fn from_config(config: &BackendConfig) -> DbResult<Self> {
        match config {
            BackendConfig::Networked(networked) => Ok(Self::MySql(MySqlDriver::new(networked)?)),
            BackendConfig::Embedded(embedded) => {
                Ok(Self::SQLite(SqliteDriver::open(&embedded.path)?))
            }
        }
    }
}

pub enum AnyConnection {
    MySql(MySqlLink),
    SQLite(SqliteLink),
}

pub enum AnyCompiled {
    MySql(sqlx::mysql::MySqlStatement<'static>),
    SQLite(sqlx::sqlite::SqliteStatement<'static>),
}

impl Driver for AnyDriver {
    type Connection = AnyConnection;

    fn dialect(&self) -> Dialect {
        impl_backend_dispatch!(AnyDriver, self, {
            MySql(d) => d.dialect(),
            SQLite(d) => d.dialect(),
        })
    }

    fn connect(&self) -> DbResult<AnyConnection> {
        impl_backend_dispatch!(AnyDriver, self, {
            MySql(d) => d.connect().map(AnyConnection::MySql),
            SQLite(d) => d.connect().map(AnyConnection::SQLite),
        })
    }
}

impl DriverConnection for AnyConnection {
    type Compiled = AnyCompiled;

    fn prepare(&mut self, sql: &str, returns_keys: bool) -> DbResult<AnyCompiled> {
        impl_backend_dispatch!(AnyConnection, self, {
            MySql(c) => c.prepare(sql, returns_keys).map(AnyCompiled::MySql),
            SQLite(c) => c.prepare(sql, returns_keys).map(AnyCompiled::SQLite),
        })
    }

    fn execute(&mut self, compiled: &AnyCompiled, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        impl_paired_dispatch!(self, compiled, (c, s) => c.execute(s, params))
    }

    fn query(&mut self, compiled: &AnyCompiled, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        impl_paired_dispatch!(self, compiled, (c, s) => c.query(s, params))
    }

    fn is_valid(&mut self) -> bool {
        impl_backend_dispatch!(AnyConnection, self, {
            MySql(c) => c.is_valid(),
            SQLite(c) => c.is_valid(),
        })
    }

    fn close(self) -> DbResult<()> {
        impl_backend_dispatch!(AnyConnection, self, {
            MySql(c) => c.close(),
            SQLite(c) => c.close(),
        })
    }
}
