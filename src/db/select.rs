//! Queries materialized into records.

use crate::db::driver::Driver;
use crate::db::pool::ConnectionPool;
use crate::db::statement::Statement;
use crate::error::DbResult;
use crate::models::{Param, TableDescriptor, TypeMapperRegistry};
use std::sync::Arc;

/// A [`Statement`] whose rows are turned into `T` through a table's
/// descriptor: every field is read in declared order, then the record
/// factory is called with the values.
pub struct SelectStatement<D: Driver, T> {
    statement: Statement<D>,
    table: Arc<TableDescriptor<T>>,
}

impl<D: Driver, T> std::fmt::Debug for SelectStatement<D, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectStatement")
            .field("table", &self.table.name())
            .field("statement", &self.statement)
            .finish()
    }
}

impl<D: Driver, T> SelectStatement<D, T> {
    pub fn new(
        pool: &Arc<ConnectionPool<D>>,
        mappers: &Arc<TypeMapperRegistry>,
        table: &Arc<TableDescriptor<T>>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            statement: Statement::new(pool, mappers, sql, false),
            table: Arc::clone(table),
        }
    }

    pub fn statement(&self) -> &Statement<D> {
        &self.statement
    }

    /// First row as a record, or `None` when the query matched nothing.
    pub fn select_one(&self, params: &[&dyn Param]) -> DbResult<Option<T>> {
        self.statement.select_with(params, |rows| {
            rows.first().map(|row| self.table.read_row(row)).transpose()
        })
    }

    /// All rows as records, in result order.
    pub fn select_all(&self, params: &[&dyn Param]) -> DbResult<Vec<T>> {
        self.statement.select_with(params, |rows| {
            rows.iter().map(|row| self.table.read_row(row)).collect()
        })
    }

    pub fn close(self) {
        self.statement.close();
    }
}
