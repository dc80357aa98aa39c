//! Reusable parameterized statements.
//!
//! A [`Statement`] holds fixed SQL text and compiles it lazily on every
//! connection it runs on, caching the compiled form per connection. Each
//! execution acquires a connection, binds the parameters positionally through
//! the type mapper registry, runs, and returns the connection to the pool.
//!
//! When an execution fails on a connection that no longer passes the liveness
//! check, the connection is invalidated and the operation is retried once on
//! another connection. A failure on a live connection is attributed to the
//! statement itself and surfaced as `DbError::Statement`.

use crate::db::driver::{Driver, DriverConnection};
use crate::db::pool::{ConnectionId, ConnectionPool, PooledConnection};
use crate::db::registry::{CompiledCache, Registration};
use crate::error::{DbError, DbResult};
use crate::models::{Param, Row, SqlValue, TypeMapperRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Retries after an execution failed on an invalid connection.
pub const MAX_RETRIES: usize = 1;

type Compiled<D> = <<D as Driver>::Connection as DriverConnection>::Compiled;

/// Compiled forms of one statement, keyed by the connection they belong to.
struct StatementCache<D: Driver> {
    compiled: Mutex<HashMap<ConnectionId, Compiled<D>>>,
}

impl<D: Driver> StatementCache<D> {
    fn take(&self, connection: ConnectionId) -> Option<Compiled<D>> {
        self.compiled.lock().remove(&connection)
    }

    fn put(&self, connection: ConnectionId, compiled: Compiled<D>) {
        self.compiled.lock().insert(connection, compiled);
    }

    fn len(&self) -> usize {
        self.compiled.lock().len()
    }

    fn clear(&self) {
        self.compiled.lock().clear();
    }
}

impl<D: Driver> CompiledCache for StatementCache<D> {
    fn forget(&self, connection: ConnectionId) {
        self.compiled.lock().remove(&connection);
    }
}

pub struct Statement<D: Driver> {
    sql: String,
    returns_keys: bool,
    pool: Arc<ConnectionPool<D>>,
    mappers: Arc<TypeMapperRegistry>,
    cache: Arc<StatementCache<D>>,
    registration: Registration,
}

impl<D: Driver> std::fmt::Debug for Statement<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("returns_keys", &self.returns_keys)
            .field("compiled", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Statement<D> {
    /// Create a statement and register it for invalidation broadcasts.
    pub fn new(
        pool: &Arc<ConnectionPool<D>>,
        mappers: &Arc<TypeMapperRegistry>,
        sql: impl Into<String>,
        returns_keys: bool,
    ) -> Self {
        let cache = Arc::new(StatementCache::<D> {
            compiled: Mutex::new(HashMap::new()),
        });
        let weak: Weak<dyn CompiledCache> = Arc::downgrade(&cache) as Weak<dyn CompiledCache>;
        let registration = pool.registry().register(weak);
        Self {
            sql: sql.into(),
            returns_keys,
            pool: Arc::clone(pool),
            mappers: Arc::clone(mappers),
            cache,
            registration,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn returns_keys(&self) -> bool {
        self.returns_keys
    }

    /// Number of connections this statement currently holds a compiled form for.
    pub fn compiled_count(&self) -> usize {
        self.cache.len()
    }

    /// Execute a write and return the number of affected rows.
    pub fn update(&self, params: &[&dyn Param]) -> DbResult<u64> {
        self.with_connection(params, |conn, compiled, values| {
            conn.execute(compiled, values).map(|o| o.rows_affected)
        })
    }

    /// Execute an insert and return the key the backend generated for it.
    pub fn insert_get_key(&self, params: &[&dyn Param]) -> DbResult<i64> {
        if !self.returns_keys {
            return Err(DbError::configuration(format!(
                "statement was not built to return generated keys: {}",
                self.sql
            )));
        }
        self.with_connection(params, |conn, compiled, values| {
            conn.execute(compiled, values)?.last_insert_id.ok_or_else(|| {
                DbError::database(
                    "Statement produced no generated key",
                    None,
                    "Only inserts into tables with a generated key return one",
                )
            })
        })
    }

    /// Run a query and return its rows.
    pub fn query(&self, params: &[&dyn Param]) -> DbResult<Vec<Row>> {
        self.with_connection(params, |conn, compiled, values| conn.query(compiled, values))
    }

    /// Run a query and hand the materialized rows to `consumer`.
    ///
    /// The connection is back in the pool before `consumer` runs; its errors
    /// are returned unchanged.
    pub fn select_with<R, F>(&self, params: &[&dyn Param], consumer: F) -> DbResult<R>
    where
        F: FnOnce(&[Row]) -> DbResult<R>,
    {
        let rows = self.query(params)?;
        consumer(&rows)
    }

    /// Release every compiled form and leave the registry.
    pub fn close(self) {
        drop(self);
    }

    fn with_connection<R, F>(&self, params: &[&dyn Param], op: F) -> DbResult<R>
    where
        F: Fn(&mut D::Connection, &Compiled<D>, &[SqlValue]) -> DbResult<R>,
    {
        let values = self.mappers.bind_all(params)?;
        let mut attempt = 0;
        loop {
            let mut guard = self.pool.get()?;
            let conn = guard.connection()?;
            let err = match self.run_on(conn, &values, &op) {
                Ok(result) => {
                    guard.release();
                    return Ok(result);
                }
                Err(err) => err,
            };

            let connection_id = conn.id();
            if conn.conn_mut().is_valid() {
                guard.release();
                return Err(DbError::statement(&self.sql, err));
            }

            guard.invalidate();
            if attempt >= MAX_RETRIES {
                warn!(
                    connection_id = %connection_id,
                    sql = %self.sql,
                    error = %err,
                    "Statement failed again on an invalid connection"
                );
                return Err(DbError::statement(&self.sql, err));
            }
            attempt += 1;
            warn!(
                connection_id = %connection_id,
                sql = %self.sql,
                attempt,
                error = %err,
                "Connection became invalid, retrying statement"
            );
        }
    }

    fn run_on<R, F>(
        &self,
        conn: &mut PooledConnection<D::Connection>,
        values: &[SqlValue],
        op: &F,
    ) -> DbResult<R>
    where
        F: Fn(&mut D::Connection, &Compiled<D>, &[SqlValue]) -> DbResult<R>,
    {
        let id = conn.id();
        let compiled = match self.cache.take(id) {
            Some(compiled) => compiled,
            None => {
                debug!(connection_id = %id, sql = %self.sql, "Preparing statement");
                conn.conn_mut().prepare(&self.sql, self.returns_keys)?
            }
        };
        let result = op(conn.conn_mut(), &compiled, values);
        self.cache.put(id, compiled);
        result
    }
}

impl<D: Driver> Drop for Statement<D> {
    fn drop(&mut self) {
        self.pool.registry().unregister(self.registration);
        self.cache.clear();
    }
}
