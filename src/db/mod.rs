//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Backend drivers behind the `Driver` seam (MySQL, SQLite)
//! - Bounded blocking connection pool
//! - Statements with a per-connection compiled-form cache
//! - Row materialization into records
//! - Dialect-aware SQL synthesis
//! - Backend dispatch macros for reducing code duplication

pub mod any;
pub mod dialect;
pub mod driver;
#[macro_use]
pub mod macros;
pub mod mysql;
pub mod params;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod select;
pub mod sqlite;
pub mod statement;
pub mod types;

pub use any::{AnyCompiled, AnyConnection, AnyDriver};
pub use dialect::Dialect;
pub use driver::{Driver, DriverConnection, ExecOutcome};
pub use mysql::MySqlDriver;
pub use pool::{ConnectionId, ConnectionPool, PoolGuard, PoolStats, PooledConnection};
pub use registry::{CompiledCache, StatementRegistry};
pub use schema::SchemaSynthesizer;
pub use select::SelectStatement;
pub use sqlite::SqliteDriver;
pub use statement::Statement;
