//! Declarative table metadata.
//!
//! A [`TableDescriptor`] is built once per record type, validated against the
//! type mapper registry, and never mutated afterwards. Field order is the
//! positional column order used everywhere: generated column lists, bound
//! parameters of `insert_all`, and the arguments handed to the record factory.

use crate::error::{DbError, DbResult};
use crate::models::mapper::{TypeMapper, TypeMapperRegistry};
use crate::models::value::Row;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Name of the key group that forms the primary key. Every other key group
/// becomes a unique constraint.
pub const PRIMARY: &str = "primary";

type Factory<T> = dyn Fn(&mut FieldValues) -> DbResult<T> + Send + Sync;

/// Per-field options used while building a descriptor.
#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    keys: Vec<String>,
    default_literal: Option<String>,
}

impl FieldSpec {
    /// Plain data column.
    pub fn data() -> Self {
        Self::default()
    }

    /// Column that belongs to the named key group.
    pub fn key(group: impl Into<String>) -> Self {
        Self::default().and_key(group)
    }

    /// Add membership in another key group.
    pub fn and_key(mut self, group: impl Into<String>) -> Self {
        self.keys.push(group.into());
        self
    }

    /// SQL literal used as the column default in generated DDL.
    pub fn default_literal(mut self, literal: impl Into<String>) -> Self {
        self.default_literal = Some(literal.into());
        self
    }
}

/// One column of a table.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    identifier: String,
    type_id: TypeId,
    type_name: &'static str,
    sql_type: String,
    nullable: bool,
    default_literal: Option<String>,
    keys: Vec<String>,
}

impl FieldDescriptor {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }

    /// Nullability follows the mapper: `Option<T>` fields are nullable.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default_literal(&self) -> Option<&str> {
        self.default_literal.as_deref()
    }

    /// Key groups this field belongs to.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// True when the field is part of no key group.
    pub fn is_data(&self) -> bool {
        self.keys.is_empty()
    }
}

/// A named key group and the indices of its fields, in field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup {
    name: String,
    fields: Vec<usize>,
}

impl KeyGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_indices(&self) -> &[usize] {
        &self.fields
    }

    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY
    }
}

/// Column values of one row, read through the field mappers and handed to the
/// record factory in field order.
pub struct FieldValues {
    table: String,
    names: Vec<String>,
    values: Vec<Option<Box<dyn Any + Send>>>,
    cursor: usize,
}

impl FieldValues {
    /// Take the next value in field order.
    pub fn next<T: Any>(&mut self) -> DbResult<T> {
        let index = self.cursor;
        self.cursor += 1;
        self.take(index)
    }

    /// Take the value at `index`. Each value can be taken once.
    pub fn take<T: Any>(&mut self, index: usize) -> DbResult<T> {
        let slot = self.values.get_mut(index).ok_or_else(|| {
            DbError::configuration(format!(
                "record factory of '{}' asked for field {} but the table has {} fields",
                self.table,
                index,
                self.names.len()
            ))
        })?;
        let value = slot.take().ok_or_else(|| {
            DbError::configuration(format!(
                "record factory of '{}' took field '{}' twice",
                self.table, self.names[index]
            ))
        })?;
        value.downcast::<T>().map(|b| *b).map_err(|_| {
            DbError::configuration(format!(
                "record factory of '{}' expects {} for field '{}'",
                self.table,
                std::any::type_name::<T>(),
                self.names[index]
            ))
        })
    }

    /// Number of values not taken yet.
    pub fn remaining(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Immutable metadata of one record type.
pub struct TableDescriptor<T> {
    name: String,
    fields: Vec<FieldDescriptor>,
    keys: Vec<KeyGroup>,
    mappers: Arc<TypeMapperRegistry>,
    factory: Box<Factory<T>>,
}

impl<T> fmt::Debug for TableDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl<T> TableDescriptor<T> {
    pub fn builder(name: impl Into<String>) -> TableDescriptorBuilder<T> {
        TableDescriptorBuilder {
            name: name.into(),
            fields: Vec::new(),
            _record: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn key_groups(&self) -> &[KeyGroup] {
        &self.keys
    }

    /// Index of a field by identifier (case-insensitive).
    pub fn field_index(&self, identifier: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.identifier.eq_ignore_ascii_case(identifier))
    }

    pub fn field(&self, identifier: &str) -> Option<&FieldDescriptor> {
        self.field_index(identifier).map(|idx| &self.fields[idx])
    }

    /// Look up a key group, failing for unknown names.
    pub fn key_group(&self, name: &str) -> DbResult<&KeyGroup> {
        self.keys.iter().find(|k| k.name == name).ok_or_else(|| {
            DbError::configuration(format!(
                "table '{}' has no key group '{}'",
                self.name, name
            ))
        })
    }

    /// Identifiers of the fields forming a key group, in field order.
    pub fn key_fields(&self, group: &str) -> DbResult<Vec<&str>> {
        Ok(self
            .key_group(group)?
            .fields
            .iter()
            .map(|&idx| self.fields[idx].identifier.as_str())
            .collect())
    }

    /// Resolve caller-supplied field names to the declared identifiers.
    pub fn resolve_fields<'a>(&'a self, names: &[&str]) -> DbResult<Vec<&'a FieldDescriptor>> {
        names
            .iter()
            .map(|name| {
                self.field(name).ok_or_else(|| {
                    DbError::configuration(format!(
                        "table '{}' has no field '{}'",
                        self.name, name
                    ))
                })
            })
            .collect()
    }

    /// Materialize one row into a record: every field is read through its
    /// mapper in declared order, then the factory receives the values.
    pub fn read_row(&self, row: &Row) -> DbResult<T> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            values.push(Some(self.mapper(field)?.read_value(row, &field.identifier)?));
        }
        let mut values = FieldValues {
            table: self.name.clone(),
            names: self.fields.iter().map(|f| f.identifier.clone()).collect(),
            values,
            cursor: 0,
        };
        let record = (self.factory)(&mut values)?;
        if values.remaining() > 0 {
            return Err(DbError::configuration(format!(
                "record factory of '{}' left {} of {} fields unused",
                self.name,
                values.remaining(),
                self.fields.len()
            )));
        }
        Ok(record)
    }

    fn mapper(&self, field: &FieldDescriptor) -> DbResult<&TypeMapper> {
        self.mappers.get(field.type_id).ok_or_else(|| {
            DbError::internal(format!(
                "mapper for field '{}' disappeared from the registry",
                field.identifier
            ))
        })
    }
}

struct PendingField {
    identifier: String,
    type_id: TypeId,
    type_name: &'static str,
    spec: FieldSpec,
}

/// Collects fields and validates them into a [`TableDescriptor`].
pub struct TableDescriptorBuilder<T> {
    name: String,
    fields: Vec<PendingField>,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T> TableDescriptorBuilder<T> {
    /// Append a field of value type `F`.
    pub fn field<F: Any>(mut self, identifier: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push(PendingField {
            identifier: identifier.into(),
            type_id: TypeId::of::<F>(),
            type_name: std::any::type_name::<F>(),
            spec,
        });
        self
    }

    /// Validate the metadata and attach the record factory.
    ///
    /// Fails for an invalid table or column name, duplicate columns, a field
    /// type without mapper, an empty key group name, or a default literal on a
    /// nullable column.
    pub fn build<F>(self, mappers: &Arc<TypeMapperRegistry>, factory: F) -> DbResult<TableDescriptor<T>>
    where
        F: Fn(&mut FieldValues) -> DbResult<T> + Send + Sync + 'static,
    {
        validate_identifier(&self.name, "table")?;
        if self.fields.is_empty() {
            return Err(DbError::configuration(format!(
                "table '{}' declares no fields",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(self.fields.len());
        for pending in self.fields {
            validate_identifier(&pending.identifier, "column")?;
            if !seen.insert(pending.identifier.to_ascii_lowercase()) {
                return Err(DbError::configuration(format!(
                    "table '{}' declares field '{}' twice",
                    self.name, pending.identifier
                )));
            }
            let mapper = mappers.get(pending.type_id).ok_or_else(|| {
                DbError::configuration(format!(
                    "field '{}.{}' has type {} without a registered mapper",
                    self.name, pending.identifier, pending.type_name
                ))
            })?;
            if pending.spec.keys.iter().any(|k| k.trim().is_empty()) {
                return Err(DbError::configuration(format!(
                    "field '{}.{}' names an empty key group",
                    self.name, pending.identifier
                )));
            }
            if mapper.is_nullable() && pending.spec.default_literal.is_some() {
                return Err(DbError::configuration(format!(
                    "nullable field '{}.{}' cannot declare a default literal",
                    self.name, pending.identifier
                )));
            }
            let mut keys = Vec::new();
            for key in pending.spec.keys {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            fields.push(FieldDescriptor {
                identifier: pending.identifier,
                type_id: pending.type_id,
                type_name: pending.type_name,
                sql_type: mapper.sql_type().to_string(),
                nullable: mapper.is_nullable(),
                default_literal: pending.spec.default_literal,
                keys,
            });
        }

        let mut keys: Vec<KeyGroup> = Vec::new();
        for (idx, field) in fields.iter().enumerate() {
            for key in &field.keys {
                match keys.iter_mut().find(|k| &k.name == key) {
                    Some(group) => group.fields.push(idx),
                    None => keys.push(KeyGroup {
                        name: key.clone(),
                        fields: vec![idx],
                    }),
                }
            }
        }

        Ok(TableDescriptor {
            name: self.name,
            fields,
            keys,
            mappers: Arc::clone(mappers),
            factory: Box::new(factory),
        })
    }
}

fn validate_identifier(identifier: &str, what: &str) -> DbResult<()> {
    let mut chars = identifier.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DbError::configuration(format!(
            "invalid {what} name '{identifier}'"
        )))
    }
}
