//! Backend driver seam.
//!
//! A [`Driver`] establishes physical connections; a [`DriverConnection`]
//! compiles SQL text into its backend-native prepared form and executes it
//! with positional parameters. Everything above this seam (pool, statement
//! cache, retry, materialization) is backend-agnostic.

use crate::db::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Worker threads of the runtime that drives the sqlx connections.
const IO_WORKER_THREADS: usize = 2;

/// Result of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Key generated by the backend for the last inserted row, if any.
    pub last_insert_id: Option<i64>,
}

/// Factory of physical connections for one backend.
pub trait Driver: Send + Sync + 'static {
    type Connection: DriverConnection;

    fn dialect(&self) -> Dialect;

    /// Establish a new physical connection. Failures are not retried.
    fn connect(&self) -> DbResult<Self::Connection>;
}

/// One live physical connection. Used by at most one thread at a time.
pub trait DriverConnection: Send + 'static {
    /// Backend-native compiled form of a statement, bound to this connection.
    type Compiled: Send + 'static;

    fn prepare(&mut self, sql: &str, returns_keys: bool) -> DbResult<Self::Compiled>;

    fn execute(&mut self, compiled: &Self::Compiled, params: &[SqlValue]) -> DbResult<ExecOutcome>;

    fn query(&mut self, compiled: &Self::Compiled, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    /// Liveness check: false when the connection is closed or unresponsive.
    fn is_valid(&mut self) -> bool;

    fn close(self) -> DbResult<()>;
}

/// Build the runtime behind the blocking sqlx drivers.
///
/// Calls block the calling thread; they must not be made from inside another
/// tokio runtime (use `spawn_blocking` there).
pub(crate) fn io_runtime() -> DbResult<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(IO_WORKER_THREADS)
        .thread_name("tablekit-io")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| DbError::internal(format!("Failed to start I/O runtime: {}", e)))
}
