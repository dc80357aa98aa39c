//! tablekit
//!
//! A relational storage layer with a bounded blocking connection pool,
//! cached prepared statements and declarative table metadata, over a
//! networked MySQL backend or an embedded single-file SQLite fallback.

pub mod config;
pub mod config_store;
pub mod database;
pub mod db;
pub mod error;
pub mod models;

pub use config::{BackendConfig, Config};
pub use config_store::{ConfigStore, Setting};
pub use database::{Database, Table};
pub use error::{DbError, DbResult};
