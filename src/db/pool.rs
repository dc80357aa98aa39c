//! Bounded blocking connection pool.
//!
//! The pool owns at most `max_connections` physical connections. Idle
//! connections are reused most-recently-released first; new ones are created
//! only while the creation budget is positive. At all times
//! `idle + checked_out + budget == max_connections`.
//!
//! Acquisition blocks the calling thread until a connection is available.
//! An optional timeout may be configured; the default waits indefinitely.

use crate::db::driver::{Driver, DriverConnection};
use crate::db::registry::StatementRegistry;
use crate::error::{DbError, DbResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identity of one physical connection for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection checked out of the pool, owned by exactly one caller.
///
/// Hand it back with [`ConnectionPool::release`] or
/// [`ConnectionPool::invalidate`].
pub struct PooledConnection<C> {
    id: ConnectionId,
    conn: C,
}

impl<C> PooledConnection<C> {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub max_connections: usize,
    pub idle: usize,
    /// Connections that may still be created.
    pub budget: usize,
    pub checked_out: usize,
}

struct PoolState<C> {
    idle: Vec<PooledConnection<C>>,
    budget: usize,
    shutting_down: bool,
}

pub struct ConnectionPool<D: Driver> {
    driver: D,
    max_connections: usize,
    acquire_timeout: Option<Duration>,
    state: Mutex<PoolState<D::Connection>>,
    available: Condvar,
    registry: Arc<StatementRegistry>,
    next_id: AtomicU64,
}

impl<D: Driver> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("dialect", &self.driver.dialect())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConnectionPool<D> {
    pub fn new(driver: D, max_connections: usize) -> DbResult<Self> {
        if max_connections == 0 {
            return Err(DbError::configuration(
                "connection pool needs at least one connection",
            ));
        }
        Ok(Self {
            driver,
            max_connections,
            acquire_timeout: None,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(max_connections),
                budget: max_connections,
                shutting_down: false,
            }),
            available: Condvar::new(),
            registry: Arc::new(StatementRegistry::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Bound the wait of [`acquire`](Self::acquire). `None` waits forever.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn registry(&self) -> &Arc<StatementRegistry> {
        &self.registry
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            max_connections: self.max_connections,
            idle: state.idle.len(),
            budget: state.budget,
            checked_out: self.max_connections - state.idle.len() - state.budget,
        }
    }

    /// Take a connection, waiting for one to become available.
    ///
    /// Connection establishment failures are returned as is and restore the
    /// creation budget. Fails with `PoolClosed` once [`drain_all`](Self::drain_all)
    /// has begun.
    pub fn acquire(&self) -> DbResult<PooledConnection<D::Connection>> {
        self.acquire_until(self.acquire_timeout.map(|t| Instant::now() + t))
    }

    /// Like [`acquire`](Self::acquire) with an explicit wait bound.
    pub fn acquire_timeout(&self, timeout: Duration) -> DbResult<PooledConnection<D::Connection>> {
        self.acquire_until(Some(Instant::now() + timeout))
    }

    /// Take a connection wrapped in a guard that releases it on drop.
    pub fn get(&self) -> DbResult<PoolGuard<'_, D>> {
        let conn = self.acquire()?;
        Ok(PoolGuard {
            pool: self,
            conn: Some(conn),
        })
    }

    fn acquire_until(&self, deadline: Option<Instant>) -> DbResult<PooledConnection<D::Connection>> {
        let started = Instant::now();
        let mut state = self.state.lock();
        loop {
            if state.shutting_down {
                return Err(DbError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop() {
                debug!(connection_id = %conn.id, "Reusing idle connection");
                return Ok(conn);
            }
            if state.budget > 0 {
                state.budget -= 1;
                drop(state);
                return self.create();
            }
            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                        && state.budget == 0
                        && !state.shutting_down
                    {
                        let elapsed = started.elapsed().as_millis() as u64;
                        warn!(elapsed_ms = elapsed, "Timed out waiting for a connection");
                        return Err(DbError::timeout("connection acquire", elapsed));
                    }
                }
            }
        }
    }

    /// Establish a connection outside the lock. The budget was already taken.
    fn create(&self) -> DbResult<PooledConnection<D::Connection>> {
        match self.driver.connect() {
            Ok(conn) => {
                let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                info!(connection_id = %id, dialect = %self.driver.dialect(), "Created connection");
                Ok(PooledConnection { id, conn })
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.budget += 1;
                self.available.notify_all();
                Err(e)
            }
        }
    }

    /// Return a usable connection to the idle set.
    pub fn release(&self, conn: PooledConnection<D::Connection>) {
        debug!(connection_id = %conn.id, "Releasing connection");
        let mut state = self.state.lock();
        state.idle.push(conn);
        self.available.notify_all();
    }

    /// Take a connection out of circulation for good.
    ///
    /// Every live statement first drops its compiled form for the connection.
    /// Closing is best effort; the creation budget is restored either way.
    pub fn invalidate(&self, conn: PooledConnection<D::Connection>) {
        let PooledConnection { id, conn } = conn;
        warn!(connection_id = %id, "Invalidating connection");
        self.registry.invalidate(id);
        if let Err(e) = conn.close() {
            warn!(connection_id = %id, error = %e, "Failed to close connection");
        }
        let mut state = self.state.lock();
        state.budget += 1;
        self.available.notify_all();
    }

    /// Wait for every checked-out connection to come back, then close all of
    /// them. New acquisitions fail with `PoolClosed` from the start of the
    /// drain.
    pub fn drain_all(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            // Wake blocked acquirers so they observe the shutdown.
            self.available.notify_all();
            while state.idle.len() + state.budget < self.max_connections {
                self.available.wait(&mut state);
            }
            std::mem::take(&mut state.idle)
        };
        let count = idle.len();
        for conn in idle {
            self.invalidate(conn);
        }
        info!(closed = count, "Connection pool drained");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}

/// RAII handle over a checked-out connection.
///
/// Dropping the guard releases the connection. Call
/// [`invalidate`](Self::invalidate) instead when the connection turned out to
/// be unusable.
pub struct PoolGuard<'a, D: Driver> {
    pool: &'a ConnectionPool<D>,
    conn: Option<PooledConnection<D::Connection>>,
}

impl<D: Driver> std::fmt::Debug for PoolGuard<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("connection_id", &self.conn.as_ref().map(|c| c.id))
            .finish_non_exhaustive()
    }
}

impl<D: Driver> PoolGuard<'_, D> {
    pub fn id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(|c| c.id)
    }

    /// The connection while the guard holds it.
    pub fn connection(&mut self) -> DbResult<&mut PooledConnection<D::Connection>> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::internal("pool guard no longer holds a connection"))
    }

    /// Explicitly release the connection (equivalent to dropping the guard).
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }

    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.invalidate(conn);
        }
    }
}

impl<D: Driver> Drop for PoolGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
