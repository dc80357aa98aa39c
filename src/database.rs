//! Storage layer entry point.
//!
//! A [`Database`] ties together the connection pool, the type mapper registry
//! and the dialect of the configured backend. Record types are registered
//! with [`Database::table`], which returns a [`Table`] that builds the
//! statements for that record type.

use crate::config::BackendConfig;
use crate::db::{
    AnyDriver, ConnectionPool, Dialect, Driver, SchemaSynthesizer, SelectStatement, Statement,
};
use crate::error::DbResult;
use crate::models::{TableDescriptor, TypeMapperRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct Database<D: Driver> {
    pool: Arc<ConnectionPool<D>>,
    mappers: Arc<TypeMapperRegistry>,
    synthesizer: SchemaSynthesizer,
}

impl<D: Driver> std::fmt::Debug for Database<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Database<AnyDriver> {
    /// Open the configured backend. Acquisition waits without bound.
    pub fn open(config: &BackendConfig, mappers: Arc<TypeMapperRegistry>) -> DbResult<Self> {
        Self::open_with(config, mappers, None)
    }

    pub fn open_with(
        config: &BackendConfig,
        mappers: Arc<TypeMapperRegistry>,
        acquire_timeout: Option<Duration>,
    ) -> DbResult<Self> {
        let driver = AnyDriver::from_config(config)?;
        info!(
            dialect = %config.dialect(),
            max_connections = config.max_connections(),
            "Opening database"
        );
        Self::new(driver, config.max_connections(), mappers, acquire_timeout)
    }
}

impl<D: Driver> Database<D> {
    pub fn new(
        driver: D,
        max_connections: usize,
        mappers: Arc<TypeMapperRegistry>,
        acquire_timeout: Option<Duration>,
    ) -> DbResult<Self> {
        let synthesizer = SchemaSynthesizer::new(driver.dialect());
        let pool = ConnectionPool::new(driver, max_connections)?.with_acquire_timeout(acquire_timeout);
        Ok(Self {
            pool: Arc::new(pool),
            mappers,
            synthesizer,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.synthesizer.dialect()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        &self.pool
    }

    pub fn mappers(&self) -> &Arc<TypeMapperRegistry> {
        &self.mappers
    }

    /// Register a record type. On the embedded backend its table is created
    /// if missing; the networked schema is provisioned out of band.
    pub fn table<T>(&self, descriptor: TableDescriptor<T>) -> DbResult<Table<T, D>> {
        let table = Table {
            descriptor: Arc::new(descriptor),
            pool: Arc::clone(&self.pool),
            mappers: Arc::clone(&self.mappers),
            synthesizer: self.synthesizer,
        };
        if self.dialect().creates_schema() {
            let ddl = table.create_table_sql();
            debug!(table = table.descriptor.name(), "Ensuring table exists");
            self.statement(ddl, false).update(&[])?;
        }
        Ok(table)
    }

    /// A statement over arbitrary SQL text.
    pub fn statement(&self, sql: impl Into<String>, returns_keys: bool) -> Statement<D> {
        Statement::new(&self.pool, &self.mappers, sql, returns_keys)
    }

    /// Wait for all connections to come back and close them. Later
    /// acquisitions fail with `PoolClosed`.
    pub fn shutdown(&self) {
        info!(dialect = %self.dialect(), "Shutting down database");
        self.pool.drain_all();
    }
}

/// Statement factory of one registered record type.
pub struct Table<T, D: Driver> {
    descriptor: Arc<TableDescriptor<T>>,
    pool: Arc<ConnectionPool<D>>,
    mappers: Arc<TypeMapperRegistry>,
    synthesizer: SchemaSynthesizer,
}

impl<T, D: Driver> std::fmt::Debug for Table<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<T, D: Driver> Table<T, D> {
    pub fn descriptor(&self) -> &Arc<TableDescriptor<T>> {
        &self.descriptor
    }

    /// DDL of this table, for provisioning the networked backend.
    pub fn create_table_sql(&self) -> String {
        self.synthesizer.create_table(&self.descriptor)
    }

    pub fn select_by(&self, group: &str) -> DbResult<SelectStatement<D, T>> {
        let sql = self.synthesizer.select_by(&self.descriptor, group)?;
        Ok(self.select(sql))
    }

    pub fn select_by_null_safe(&self, group: &str) -> DbResult<SelectStatement<D, T>> {
        let sql = self.synthesizer.select_by_null_safe(&self.descriptor, group)?;
        Ok(self.select(sql))
    }

    pub fn select_fields(&self, fields: &[&str]) -> DbResult<SelectStatement<D, T>> {
        let sql = self.synthesizer.select_fields(&self.descriptor, fields)?;
        Ok(self.select(sql))
    }

    /// Parameters: the new field values, then the key group values.
    pub fn update(&self, group: &str, fields: &[&str]) -> DbResult<Statement<D>> {
        let sql = self.synthesizer.update(&self.descriptor, group, fields)?;
        Ok(self.statement(sql, false))
    }

    pub fn update_fields(&self, fields: &[&str], group: &str) -> DbResult<Statement<D>> {
        self.update(group, fields)
    }

    pub fn update_field(&self, field: &str, key_fields: &[&str]) -> DbResult<Statement<D>> {
        let sql = self.synthesizer.update_field(&self.descriptor, field, key_fields)?;
        Ok(self.statement(sql, false))
    }

    pub fn insert_all(&self) -> Statement<D> {
        let sql = self.synthesizer.insert_all(&self.descriptor);
        self.statement(sql, false)
    }

    pub fn insert(&self, group: &str) -> DbResult<Statement<D>> {
        let sql = self.synthesizer.insert(&self.descriptor, group)?;
        Ok(self.statement(sql, false))
    }

    /// Insert of a field subset, optionally returning the generated key.
    pub fn insert_fields(&self, returning_keys: bool, fields: &[&str]) -> DbResult<Statement<D>> {
        let sql = self.synthesizer.insert_fields(&self.descriptor, fields)?;
        Ok(self.statement(sql, returning_keys))
    }

    pub fn delete_by(&self, group: &str) -> DbResult<Statement<D>> {
        let sql = self.synthesizer.delete_by(&self.descriptor, group)?;
        Ok(self.statement(sql, false))
    }

    pub fn delete_fields(&self, fields: &[&str]) -> DbResult<Statement<D>> {
        let sql = self.synthesizer.delete_fields(&self.descriptor, fields)?;
        Ok(self.statement(sql, false))
    }

    fn select(&self, sql: String) -> SelectStatement<D, T> {
        SelectStatement::new(&self.pool, &self.mappers, &self.descriptor, sql)
    }

    fn statement(&self, sql: String, returns_keys: bool) -> Statement<D> {
        Statement::new(&self.pool, &self.mappers, sql, returns_keys)
    }
}
