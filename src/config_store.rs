//! Keyed settings store.
//!
//! Settings are addressed by a scope (for example a guild or tenant id) and a
//! name. Storing an absent value deletes the row, so a read never observes a
//! stored NULL.

use crate::database::{Database, Table};
use crate::db::{Driver, SelectStatement, Statement};
use crate::error::DbResult;
use crate::models::{FieldSpec, PRIMARY, TableDescriptor, TypeMapperRegistry};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONFIG_TABLE: &str = "tablekit_config";

/// One stored setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    pub scope: String,
    pub name: String,
    pub value: String,
}

impl Setting {
    pub fn descriptor(mappers: &Arc<TypeMapperRegistry>) -> DbResult<TableDescriptor<Setting>> {
        TableDescriptor::builder(CONFIG_TABLE)
            .field::<String>("scope", FieldSpec::key(PRIMARY))
            .field::<String>("name", FieldSpec::key(PRIMARY))
            .field::<String>("value", FieldSpec::data())
            .build(mappers, |v| {
                Ok(Setting {
                    scope: v.next()?,
                    name: v.next()?,
                    value: v.next()?,
                })
            })
    }
}

pub struct ConfigStore<D: Driver> {
    table: Table<Setting, D>,
    select: SelectStatement<D, Setting>,
    select_scope: SelectStatement<D, Setting>,
    upsert: Statement<D>,
    delete: Statement<D>,
}

impl<D: Driver> std::fmt::Debug for ConfigStore<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConfigStore<D> {
    pub fn new(db: &Database<D>) -> DbResult<Self> {
        let table = db.table(Setting::descriptor(db.mappers())?)?;
        Ok(Self {
            select: table.select_by(PRIMARY)?,
            select_scope: table.select_fields(&["scope"])?,
            upsert: table.insert_all(),
            delete: table.delete_by(PRIMARY)?,
            table,
        })
    }

    pub fn create_table_sql(&self) -> String {
        self.table.create_table_sql()
    }

    pub fn get(&self, scope: &str, name: &str) -> DbResult<Option<String>> {
        let (scope, name) = (scope.to_string(), name.to_string());
        let setting = self.select.select_one(&[&scope, &name])?;
        Ok(setting.map(|s| s.value))
    }

    /// The stored value, or `default` when the setting is absent.
    pub fn get_or(&self, scope: &str, name: &str, default: &str) -> DbResult<String> {
        Ok(self
            .get(scope, name)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// The stored value parsed as `T`. Absent or unparseable values yield
    /// `default`.
    pub fn get_parsed_or<T: FromStr>(&self, scope: &str, name: &str, default: T) -> DbResult<T> {
        let Some(raw) = self.get(scope, name)? else {
            return Ok(default);
        };
        match raw.parse() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(scope, name, value = %raw, "Stored setting does not parse, using default");
                Ok(default)
            }
        }
    }

    /// Store a value; `None` deletes the setting instead.
    pub fn set(&self, scope: &str, name: &str, value: Option<&str>) -> DbResult<()> {
        let Some(value) = value else {
            return self.delete(scope, name);
        };
        let (scope, name, value) = (scope.to_string(), name.to_string(), value.to_string());
        self.upsert.update(&[&scope, &name, &value])?;
        debug!(scope = %scope, name = %name, "Stored setting");
        Ok(())
    }

    /// Remove a setting. Removing an absent setting is not an error.
    pub fn delete(&self, scope: &str, name: &str) -> DbResult<()> {
        let (scope, name) = (scope.to_string(), name.to_string());
        let removed = self.delete.update(&[&scope, &name])?;
        debug!(scope = %scope, name = %name, removed, "Deleted setting");
        Ok(())
    }

    /// All settings of a scope, ordered by name.
    pub fn list(&self, scope: &str) -> DbResult<Vec<Setting>> {
        let scope = scope.to_string();
        let mut settings = self.select_scope.select_all(&[&scope])?;
        settings.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(settings)
    }
}
