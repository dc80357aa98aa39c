//! Scripted in-memory driver for pool and statement tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tablekit::db::{Dialect, Driver, DriverConnection, ExecOutcome};
use tablekit::models::{Row, SqlValue};
use tablekit::{DbError, DbResult};

/// Counters and failure injection shared by a driver and its connections.
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub prepares: AtomicUsize,
    pub executes: AtomicUsize,
    /// The next N executions fail and leave their connection dead.
    pub break_next: AtomicUsize,
    /// The next N executions fail on a healthy connection.
    pub fail_next: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub rows: Mutex<Vec<Row>>,
    pub last_params: Mutex<Vec<SqlValue>>,
}

impl MockState {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

pub struct MockConnection {
    serial: usize,
    alive: bool,
    state: Arc<MockState>,
}

pub struct MockCompiled {
    pub sql: String,
    serial: usize,
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn connect(&self) -> DbResult<MockConnection> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection("connection refused", "start the server"));
        }
        let serial = self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            serial,
            alive: true,
            state: Arc::clone(&self.state),
        })
    }
}

impl MockConnection {
    fn run(&mut self, compiled: &MockCompiled, params: &[SqlValue]) -> DbResult<()> {
        assert_eq!(
            compiled.serial, self.serial,
            "compiled form used on a foreign connection"
        );
        assert!(self.alive, "execution on a dead connection");
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        *self.state.last_params.lock() = params.to_vec();
        if MockState::take_one(&self.state.break_next) {
            self.alive = false;
            return Err(DbError::connection("broken pipe", "reconnect"));
        }
        if MockState::take_one(&self.state.fail_next) {
            return Err(DbError::database(
                "syntax error near 'SELEC'",
                Some("42000".to_string()),
                "Check the SQL syntax",
            ));
        }
        Ok(())
    }
}

impl DriverConnection for MockConnection {
    type Compiled = MockCompiled;

    fn prepare(&mut self, sql: &str, _returns_keys: bool) -> DbResult<MockCompiled> {
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(MockCompiled {
            sql: sql.to_string(),
            serial: self.serial,
        })
    }

    fn execute(&mut self, compiled: &MockCompiled, params: &[SqlValue]) -> DbResult<ExecOutcome> {
        self.run(compiled, params)?;
        Ok(ExecOutcome {
            rows_affected: 1,
            last_insert_id: Some(42),
        })
    }

    fn query(&mut self, compiled: &MockCompiled, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.run(compiled, params)?;
        Ok(self.state.rows.lock().clone())
    }

    fn is_valid(&mut self) -> bool {
        self.alive
    }

    fn close(self) -> DbResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
