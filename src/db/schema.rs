//! SQL synthesis from table descriptors.
//!
//! Every statement equates the fields of a key group (or an explicit field
//! list) to positional placeholders, in field declaration order. Inserts
//! become upserts whenever a non-key column is written: on a key conflict the
//! non-key columns take the newly inserted values. An insert of key columns
//! only stays a plain insert, so conflicts surface as errors.

use crate::db::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{FieldDescriptor, TableDescriptor};
use std::borrow::Cow;

/// Dialect-aware generator of statement and DDL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaSynthesizer {
    dialect: Dialect,
}

impl SchemaSynthesizer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// `SELECT <all columns> FROM t WHERE <group fields> = ?`.
    pub fn select_by<T>(&self, table: &TableDescriptor<T>, group: &str) -> DbResult<String> {
        let keys = table.key_fields(group)?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {}",
            column_list(table),
            table.name(),
            conditions(&keys, " = ")
        ))
    }

    /// Like [`select_by`](Self::select_by), but a NULL parameter matches a
    /// NULL column.
    pub fn select_by_null_safe<T>(&self, table: &TableDescriptor<T>, group: &str) -> DbResult<String> {
        let keys = table.key_fields(group)?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {}",
            column_list(table),
            table.name(),
            conditions(&keys, self.dialect.null_safe_equals())
        ))
    }

    /// `SELECT <all columns> FROM t WHERE <fields> = ?`.
    pub fn select_fields<T>(&self, table: &TableDescriptor<T>, fields: &[&str]) -> DbResult<String> {
        let fields = identifiers(table, fields)?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {}",
            column_list(table),
            table.name(),
            conditions(&fields, " = ")
        ))
    }

    /// `UPDATE t SET <fields> = ? WHERE <group fields> = ?`. Parameters are
    /// the new values first, then the key values.
    pub fn update<T>(&self, table: &TableDescriptor<T>, group: &str, fields: &[&str]) -> DbResult<String> {
        let keys = table.key_fields(group)?;
        let fields = identifiers(table, fields)?;
        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            table.name(),
            assignments(&fields),
            conditions(&keys, " = ")
        ))
    }

    /// [`update`](Self::update) with the field list first.
    pub fn update_fields<T>(&self, table: &TableDescriptor<T>, fields: &[&str], group: &str) -> DbResult<String> {
        self.update(table, group, fields)
    }

    /// `UPDATE t SET <field> = ? WHERE <key fields> = ?` with an explicit
    /// list of identifying fields.
    pub fn update_field<T>(
        &self,
        table: &TableDescriptor<T>,
        field: &str,
        key_fields: &[&str],
    ) -> DbResult<String> {
        let field = identifiers(table, &[field])?;
        let keys = identifiers(table, key_fields)?;
        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            table.name(),
            assignments(&field),
            conditions(&keys, " = ")
        ))
    }

    /// Insert of every column; an upsert when the table has data columns.
    pub fn insert_all<T>(&self, table: &TableDescriptor<T>) -> String {
        self.insert_descriptors(table, table.fields().iter().collect())
    }

    /// Plain insert of the fields of one key group.
    pub fn insert<T>(&self, table: &TableDescriptor<T>, group: &str) -> DbResult<String> {
        let keys = table.key_fields(group)?;
        let fields = table.resolve_fields(&keys)?;
        Ok(self.insert_descriptors(table, fields))
    }

    /// Insert of the given fields; an upsert when any of them is a data column.
    pub fn insert_fields<T>(&self, table: &TableDescriptor<T>, fields: &[&str]) -> DbResult<String> {
        if fields.is_empty() {
            return Err(empty_field_list(table));
        }
        let fields = table.resolve_fields(fields)?;
        Ok(self.insert_descriptors(table, fields))
    }

    /// `DELETE FROM t WHERE <group fields> = ?`.
    pub fn delete_by<T>(&self, table: &TableDescriptor<T>, group: &str) -> DbResult<String> {
        let keys = table.key_fields(group)?;
        Ok(format!(
            "DELETE FROM {} WHERE {}",
            table.name(),
            conditions(&keys, " = ")
        ))
    }

    pub fn delete_fields<T>(&self, table: &TableDescriptor<T>, fields: &[&str]) -> DbResult<String> {
        let fields = identifiers(table, fields)?;
        Ok(format!(
            "DELETE FROM {} WHERE {}",
            table.name(),
            conditions(&fields, " = ")
        ))
    }

    /// `CREATE TABLE IF NOT EXISTS` with one `PRIMARY KEY` clause for the
    /// primary group and one `UNIQUE` clause per other key group.
    pub fn create_table<T>(&self, table: &TableDescriptor<T>) -> String {
        let mut parts: Vec<String> = table
            .fields()
            .iter()
            .map(|f| self.column_definition(f))
            .collect();

        for group in table.key_groups() {
            let columns = group
                .field_indices()
                .iter()
                .map(|&idx| table.fields()[idx].identifier())
                .collect::<Vec<_>>()
                .join(", ");
            if group.is_primary() {
                parts.push(format!("PRIMARY KEY ({columns})"));
            } else {
                parts.push(format!("UNIQUE ({columns})"));
            }
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table.name(),
            parts.join(", ")
        )
    }

    /// Key columns get an indexable type on dialects that need one.
    fn column_definition(&self, field: &FieldDescriptor) -> String {
        let sql_type = if field.keys().is_empty() {
            Cow::Borrowed(field.sql_type())
        } else {
            self.dialect.key_column_type(field.sql_type())
        };
        if field.is_nullable() {
            return format!("{} {sql_type} NULL DEFAULT NULL", field.identifier());
        }
        match field.default_literal() {
            Some(literal) => format!(
                "{} {sql_type} NOT NULL DEFAULT {literal}",
                field.identifier()
            ),
            None => format!("{} {sql_type} NOT NULL", field.identifier()),
        }
    }

    fn insert_descriptors<T>(&self, table: &TableDescriptor<T>, fields: Vec<&FieldDescriptor>) -> String {
        let columns = fields
            .iter()
            .map(|f| f.identifier())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; fields.len()].join(", ");
        let mut sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            table.name()
        );

        let data: Vec<String> = fields
            .iter()
            .filter(|f| f.is_data())
            .map(|f| self.dialect.upsert_assignment(f.identifier()))
            .collect();
        if !data.is_empty() {
            sql.push_str(self.dialect.upsert_keyword());
            sql.push_str(&data.join(", "));
        }
        sql
    }
}

fn column_list<T>(table: &TableDescriptor<T>) -> String {
    table
        .fields()
        .iter()
        .map(|f| f.identifier())
        .collect::<Vec<_>>()
        .join(", ")
}

fn conditions(columns: &[&str], operator: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{c}{operator}?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn assignments(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(", ")
}


/// Canonical identifiers of the named fields.
fn identifiers<'a, T>(table: &'a TableDescriptor<T>, names: &[&str]) -> DbResult<Vec<&'a str>> {
    if names.is_empty() {
        return Err(empty_field_list(table));
    }
    Ok(table
        .resolve_fields(names)?
        .into_iter()
        .map(|f| f.identifier())
        .collect())
}

fn empty_field_list<T>(table: &TableDescriptor<T>) -> DbError {
    DbError::configuration(format!(
        "statement on '{}' needs at least one field",
        table.name()
    ))
}
