//! Type mappers between Rust value types and SQL columns.
//!
//! A [`TypeMapperRegistry`] is keyed by the exact [`TypeId`] of a value type
//! (no subtype lookup) and holds, per type, the SQL type declaration used in
//! DDL plus a reader (row column to value) and a writer (value to bound
//! parameter).
//!
//! # Nullability
//!
//! Primitive types (`bool`, `i8`..`i64`, `f32`, `f64`) and their `Option`
//! counterparts are distinct entries. Reading a NULL into the primitive yields
//! its zero value, reading it into the `Option` yields `None`. Text, binary and
//! timestamp types reject NULL unless read through their `Option` entry.
//!
//! The registry is built once through [`TypeMapperRegistryBuilder`] and is
//! immutable afterwards, so it can be shared across threads behind an `Arc`
//! without locking.

use crate::error::{DbError, DbResult};
use crate::models::value::{Null, Row, SqlValue};
use chrono::NaiveDateTime;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Timestamp layouts accepted when a backend hands a timestamp back as text.
const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Layout used when a timestamp has to be stored as text.
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

type ReadFn = dyn Fn(&Row, &str) -> DbResult<Box<dyn Any + Send>> + Send + Sync;
type WriteFn = dyn Fn(&dyn Any) -> DbResult<SqlValue> + Send + Sync;

/// A value that can be passed as a statement parameter.
///
/// Implemented for every `'static` type; whether the type can actually be
/// bound is decided by the registry at execution time.
pub trait Param: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> Param for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Enumerations that can be stored either by ordinal or by name.
pub trait SqlEnum: Copy + Send + Sync + 'static {
    /// All variants in declaration order. The position is the ordinal.
    const VARIANTS: &'static [Self];

    /// Stable variant name.
    fn name(self) -> &'static str;

    fn ordinal(self) -> usize {
        let name = self.name();
        Self::VARIANTS
            .iter()
            .position(|v| v.name() == name)
            .unwrap_or_default()
    }

    fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::VARIANTS.get(ordinal).copied()
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS.iter().copied().find(|v| v.name() == name)
    }
}

/// How a non-`Option` mapper treats a NULL column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullPolicy {
    /// Yield the type's zero value.
    Zero,
    /// Fail with a decode error.
    Reject,
}

/// One registry entry.
pub struct TypeMapper {
    type_name: &'static str,
    sql_type: String,
    nullable: bool,
    read: Box<ReadFn>,
    write: Box<WriteFn>,
}

impl fmt::Debug for TypeMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapper")
            .field("type_name", &self.type_name)
            .field("sql_type", &self.sql_type)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

impl TypeMapper {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// SQL type declaration used in generated DDL.
    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }

    /// Whether this mapper represents an optional value (NULL reads as `None`).
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Read a column as a type-erased value.
    pub fn read_value(&self, row: &Row, column: &str) -> DbResult<Box<dyn Any + Send>> {
        (self.read)(row, column)
    }

    /// Read a column as `T`. `T` must be the type this mapper was registered for.
    pub fn read<T: Any>(&self, row: &Row, column: &str) -> DbResult<T> {
        let value = (self.read)(row, column)?;
        value.downcast::<T>().map(|b| *b).map_err(|_| {
            DbError::configuration(format!(
                "mapper for {} cannot produce {}",
                self.type_name,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Convert a value of the registered type into a bindable parameter.
    pub fn write(&self, value: &dyn Any) -> DbResult<SqlValue> {
        (self.write)(value)
    }
}

/// Immutable lookup table from value type to [`TypeMapper`].
#[derive(Debug)]
pub struct TypeMapperRegistry {
    mappers: HashMap<TypeId, TypeMapper>,
}

impl TypeMapperRegistry {
    /// Builder preloaded with the standard mappers.
    pub fn builder() -> TypeMapperRegistryBuilder {
        TypeMapperRegistryBuilder::empty().with_standard_types()
    }

    /// Registry holding only the standard mappers.
    pub fn standard() -> Arc<Self> {
        Arc::new(Self::builder().build())
    }

    pub fn get(&self, type_id: TypeId) -> Option<&TypeMapper> {
        self.mappers.get(&type_id)
    }

    /// Look up the mapper of `T`, failing for unregistered types.
    pub fn mapper_for<T: Any>(&self) -> DbResult<&TypeMapper> {
        self.get(TypeId::of::<T>())
            .ok_or_else(|| DbError::unregistered_type(std::any::type_name::<T>()))
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.mappers.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// Convert one statement parameter, dispatching on its exact runtime type.
    ///
    /// [`Null`] always binds as NULL. Any other value must have a registered
    /// mapper; an unregistered type is a programming error.
    pub fn bind(&self, param: &dyn Param) -> DbResult<SqlValue> {
        let any = param.as_any();
        if any.is::<Null>() {
            return Ok(SqlValue::Null);
        }
        match self.mappers.get(&any.type_id()) {
            Some(mapper) => mapper.write(any),
            None => {
                tracing::error!(
                    type_name = param.type_name(),
                    "Statement parameter has no registered type mapper"
                );
                Err(DbError::unregistered_type(param.type_name()))
            }
        }
    }

    /// Convert all parameters positionally.
    pub fn bind_all(&self, params: &[&dyn Param]) -> DbResult<Vec<SqlValue>> {
        params.iter().map(|p| self.bind(*p)).collect()
    }
}

/// Populates a [`TypeMapperRegistry`]. Entries are only added here; the
/// finished registry is read-only.
pub struct TypeMapperRegistryBuilder {
    mappers: HashMap<TypeId, TypeMapper>,
}

impl TypeMapperRegistryBuilder {
    /// Builder without any mappers.
    pub fn empty() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    fn with_standard_types(self) -> Self {
        self.primitive::<bool>("BOOLEAN", decode_bool, SqlValue::Bool)
            .primitive::<i8>("TINYINT", decode_int::<i8>, |v| SqlValue::Int(v.into()))
            .primitive::<i16>("SMALLINT", decode_int::<i16>, |v| SqlValue::Int(v.into()))
            .primitive::<i32>("INTEGER", decode_int::<i32>, |v| SqlValue::Int(v.into()))
            .primitive::<i64>("BIGINT", decode_int::<i64>, SqlValue::Int)
            .primitive::<f32>("REAL", decode_f32, |v| SqlValue::Float(v.into()))
            .primitive::<f64>("REAL", decode_f64, SqlValue::Float)
            .object::<String>("TEXT", decode_text, SqlValue::Text)
            .object::<Vec<u8>>("BLOB", decode_blob, SqlValue::Blob)
            .object::<NaiveDateTime>("TIMESTAMP", decode_timestamp, SqlValue::Timestamp)
    }

    /// Register a custom type and its `Option` counterpart. NULL columns read
    /// into the bare type fail with a decode error.
    pub fn register<T>(
        self,
        sql_type: impl Into<String>,
        decode: fn(&SqlValue, &str) -> DbResult<T>,
        encode: fn(T) -> SqlValue,
    ) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.pair(sql_type.into(), NullPolicy::Reject, decode, encode)
    }

    /// Register an enumeration stored as its ordinal.
    pub fn ordinal_enum<E: SqlEnum>(self) -> Self {
        let width = E::VARIANTS.len().div_ceil(256).max(1);
        self.pair(
            format!("INTEGER({width})"),
            NullPolicy::Reject,
            decode_ordinal::<E>,
            encode_ordinal::<E>,
        )
    }

    /// Register an enumeration stored as its name.
    pub fn name_enum<E: SqlEnum>(self) -> Self {
        let longest = E::VARIANTS
            .iter()
            .map(|v| v.name().len())
            .max()
            .unwrap_or(0);
        self.pair(
            format!("VARCHAR({longest})"),
            NullPolicy::Reject,
            decode_name::<E>,
            encode_name::<E>,
        )
    }

    pub fn build(self) -> TypeMapperRegistry {
        TypeMapperRegistry {
            mappers: self.mappers,
        }
    }

    fn primitive<T>(
        self,
        sql_type: &str,
        decode: fn(&SqlValue, &str) -> DbResult<T>,
        encode: fn(T) -> SqlValue,
    ) -> Self
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        self.pair(sql_type.to_string(), NullPolicy::Zero, decode, encode)
    }

    fn object<T>(
        self,
        sql_type: &str,
        decode: fn(&SqlValue, &str) -> DbResult<T>,
        encode: fn(T) -> SqlValue,
    ) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.pair(sql_type.to_string(), NullPolicy::Reject, decode, encode)
    }

    fn pair<T>(
        mut self,
        sql_type: String,
        policy: NullPolicy,
        decode: fn(&SqlValue, &str) -> DbResult<T>,
        encode: fn(T) -> SqlValue,
    ) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let plain = TypeMapper {
            type_name: std::any::type_name::<T>(),
            sql_type: sql_type.clone(),
            nullable: false,
            read: Box::new(move |row, column| {
                let value = column_value(row, column)?;
                let decoded = match (value, policy) {
                    (SqlValue::Null, NullPolicy::Zero) => zero_value::<T>(decode, column)?,
                    (SqlValue::Null, NullPolicy::Reject) => {
                        return Err(DbError::decode(column, "unexpected NULL"));
                    }
                    (value, _) => decode(value, column)?,
                };
                Ok(Box::new(decoded) as Box<dyn Any + Send>)
            }),
            write: Box::new(move |value| {
                let typed = value.downcast_ref::<T>().ok_or_else(|| {
                    DbError::internal(format!(
                        "mapper for {} received another type",
                        std::any::type_name::<T>()
                    ))
                })?;
                Ok(encode(typed.clone()))
            }),
        };

        let optional = TypeMapper {
            type_name: std::any::type_name::<Option<T>>(),
            sql_type,
            nullable: true,
            read: Box::new(move |row, column| {
                let decoded = match column_value(row, column)? {
                    SqlValue::Null => None,
                    value => Some(decode(value, column)?),
                };
                Ok(Box::new(decoded) as Box<dyn Any + Send>)
            }),
            write: Box::new(move |value| {
                let typed = value.downcast_ref::<Option<T>>().ok_or_else(|| {
                    DbError::internal(format!(
                        "mapper for {} received another type",
                        std::any::type_name::<Option<T>>()
                    ))
                })?;
                Ok(typed.clone().map(encode).unwrap_or(SqlValue::Null))
            }),
        };

        self.mappers.insert(TypeId::of::<T>(), plain);
        self.mappers.insert(TypeId::of::<Option<T>>(), optional);
        self
    }
}

impl Default for TypeMapperRegistryBuilder {
    fn default() -> Self {
        TypeMapperRegistry::builder()
    }
}

fn column_value<'r>(row: &'r Row, column: &str) -> DbResult<&'r SqlValue> {
    row.get(column)
        .ok_or_else(|| DbError::decode(column, "column missing from result row"))
}

/// Zero value for primitive types, produced by decoding an integer zero so
/// the decode function stays the single source of truth.
fn zero_value<T>(decode: fn(&SqlValue, &str) -> DbResult<T>, column: &str) -> DbResult<T> {
    decode(&SqlValue::Int(0), column)
}

fn mismatch(column: &str, expected: &str, found: &SqlValue) -> DbError {
    DbError::decode(
        column,
        format!("expected {expected}, found {}", found.type_name()),
    )
}

// =============================================================================
// Standard Decoders
// =============================================================================

fn decode_bool(value: &SqlValue, column: &str) -> DbResult<bool> {
    match value {
        SqlValue::Bool(v) => Ok(*v),
        SqlValue::Int(v) => Ok(*v != 0),
        other => Err(mismatch(column, "bool", other)),
    }
}

fn decode_int<T>(value: &SqlValue, column: &str) -> DbResult<T>
where
    T: TryFrom<i64>,
{
    let raw = match value {
        SqlValue::Int(v) => *v,
        SqlValue::Bool(v) => i64::from(*v),
        other => return Err(mismatch(column, std::any::type_name::<T>(), other)),
    };
    T::try_from(raw).map_err(|_| {
        DbError::decode(
            column,
            format!("{raw} out of range for {}", std::any::type_name::<T>()),
        )
    })
}

fn decode_f64(value: &SqlValue, column: &str) -> DbResult<f64> {
    match value {
        SqlValue::Float(v) => Ok(*v),
        SqlValue::Int(v) => Ok(*v as f64),
        other => Err(mismatch(column, "f64", other)),
    }
}

fn decode_f32(value: &SqlValue, column: &str) -> DbResult<f32> {
    decode_f64(value, column).map(|v| v as f32)
}

fn decode_text(value: &SqlValue, column: &str) -> DbResult<String> {
    match value {
        SqlValue::Text(v) => Ok(v.clone()),
        SqlValue::Blob(bytes) => String::from_utf8(bytes.clone())
            .map_err(|e| DbError::decode(column, format!("invalid UTF-8: {e}"))),
        other => Err(mismatch(column, "text", other)),
    }
}

fn decode_blob(value: &SqlValue, column: &str) -> DbResult<Vec<u8>> {
    match value {
        SqlValue::Blob(v) => Ok(v.clone()),
        SqlValue::Text(v) => Ok(v.clone().into_bytes()),
        other => Err(mismatch(column, "blob", other)),
    }
}

fn decode_timestamp(value: &SqlValue, column: &str) -> DbResult<NaiveDateTime> {
    match value {
        SqlValue::Timestamp(v) => Ok(*v),
        SqlValue::Text(text) => TIMESTAMP_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .ok_or_else(|| DbError::decode(column, format!("unparseable timestamp '{text}'"))),
        other => Err(mismatch(column, "timestamp", other)),
    }
}

fn decode_ordinal<E: SqlEnum>(value: &SqlValue, column: &str) -> DbResult<E> {
    let ordinal: usize = decode_int::<i64>(value, column).and_then(|v| {
        usize::try_from(v).map_err(|_| DbError::decode(column, format!("negative ordinal {v}")))
    })?;
    E::from_ordinal(ordinal).ok_or_else(|| {
        DbError::decode(
            column,
            format!(
                "ordinal {ordinal} out of range for {}",
                std::any::type_name::<E>()
            ),
        )
    })
}

fn encode_ordinal<E: SqlEnum>(value: E) -> SqlValue {
    SqlValue::Int(i64::try_from(value.ordinal()).unwrap_or(i64::MAX))
}

fn decode_name<E: SqlEnum>(value: &SqlValue, column: &str) -> DbResult<E> {
    let name = decode_text(value, column)?;
    E::from_name(&name).ok_or_else(|| {
        DbError::decode(
            column,
            format!("unknown variant '{name}' of {}", std::any::type_name::<E>()),
        )
    })
}

fn encode_name<E: SqlEnum>(value: E) -> SqlValue {
    SqlValue::Text(value.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Weekday {
        Monday,
        Tuesday,
        Wednesday,
    }

    impl SqlEnum for Weekday {
        const VARIANTS: &'static [Self] = &[Self::Monday, Self::Tuesday, Self::Wednesday];

        fn name(self) -> &'static str {
            match self {
                Self::Monday => "Monday",
                Self::Tuesday => "Tuesday",
                Self::Wednesday => "Wednesday",
            }
        }
    }

    fn row_of(value: SqlValue) -> Row {
        Row::from_pairs([("col", value)])
    }

    fn round_trip<T>(registry: &TypeMapperRegistry, value: T) -> T
    where
        T: Param + Clone,
    {
        let bound = registry.bind(&value).unwrap();
        registry
            .mapper_for::<T>()
            .unwrap()
            .read::<T>(&row_of(bound), "col")
            .unwrap()
    }

    #[test]
    fn test_standard_types_round_trip() {
        let registry = TypeMapperRegistry::standard();
        assert!(round_trip(&registry, true));
        assert_eq!(round_trip(&registry, -7i8), -7);
        assert_eq!(round_trip(&registry, 1234i16), 1234);
        assert_eq!(round_trip(&registry, i32::MIN), i32::MIN);
        assert_eq!(round_trip(&registry, i64::MAX), i64::MAX);
        assert_eq!(round_trip(&registry, 1.5f32), 1.5);
        assert_eq!(round_trip(&registry, -2.25f64), -2.25);
        assert_eq!(round_trip(&registry, "text".to_string()), "text");
        assert_eq!(round_trip(&registry, vec![0u8, 1, 255]), vec![0u8, 1, 255]);
        let ts = NaiveDateTime::parse_from_str("2024-03-01 12:30:45", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(round_trip(&registry, ts), ts);
    }

    #[test]
    fn test_nullable_variants_read_none() {
        let registry = TypeMapperRegistry::standard();
        assert_eq!(round_trip(&registry, None::<i64>), None);
        assert_eq!(round_trip(&registry, Some(5i64)), Some(5));
        assert_eq!(round_trip(&registry, None::<String>), None);
        assert!(registry.mapper_for::<Option<i32>>().unwrap().is_nullable());
        assert!(!registry.mapper_for::<i32>().unwrap().is_nullable());
    }

    #[test]
    fn test_null_reads_zero_for_primitives() {
        let registry = TypeMapperRegistry::standard();
        let row = row_of(SqlValue::Null);
        assert_eq!(registry.mapper_for::<i32>().unwrap().read::<i32>(&row, "col").unwrap(), 0);
        assert!(!registry.mapper_for::<bool>().unwrap().read::<bool>(&row, "col").unwrap());
        let err = registry
            .mapper_for::<String>()
            .unwrap()
            .read::<String>(&row, "col")
            .unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }

    #[test]
    fn test_null_marker_binds_null() {
        let registry = TypeMapperRegistry::standard();
        assert_eq!(registry.bind(&Null).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_unregistered_type_fails() {
        struct Opaque;
        let registry = TypeMapperRegistry::standard();
        let err = registry.bind(&Opaque).unwrap_err();
        match err {
            DbError::UnregisteredType { type_name } => assert!(type_name.contains("Opaque")),
            other => panic!("unexpected error: {other:?}"),
        }
        // Exact type lookup: &'static str is not String.
        assert!(registry.bind(&"literal").is_err());
    }

    #[test]
    fn test_integer_overflow_is_decode_error() {
        let registry = TypeMapperRegistry::standard();
        let row = row_of(SqlValue::Int(300));
        let err = registry.mapper_for::<i8>().unwrap().read::<i8>(&row, "col").unwrap_err();
        assert!(matches!(err, DbError::Decode { .. }));
    }

    #[test]
    fn test_enum_mappers() {
        let ordinal = TypeMapperRegistry::builder().ordinal_enum::<Weekday>().build();
        assert_eq!(ordinal.bind(&Weekday::Tuesday).unwrap(), SqlValue::Int(1));
        assert_eq!(round_trip(&ordinal, Weekday::Wednesday), Weekday::Wednesday);
        assert_eq!(ordinal.mapper_for::<Weekday>().unwrap().sql_type(), "INTEGER(1)");

        let named = TypeMapperRegistry::builder().name_enum::<Weekday>().build();
        assert_eq!(named.bind(&Weekday::Monday).unwrap(), SqlValue::Text("Monday".into()));
        assert_eq!(round_trip(&named, Weekday::Monday), Weekday::Monday);
        assert_eq!(named.mapper_for::<Weekday>().unwrap().sql_type(), "VARCHAR(9)");
        assert_eq!(round_trip(&named, None::<Weekday>), None);
    }

    #[test]
    fn test_timestamp_reads_from_text() {
        let registry = TypeMapperRegistry::standard();
        let row = row_of(SqlValue::Text("2023-11-05 08:00:00.250".into()));
        let ts = registry
            .mapper_for::<NaiveDateTime>()
            .unwrap()
            .read::<NaiveDateTime>(&row, "col")
            .unwrap();
        assert_eq!(ts.format(TIMESTAMP_TEXT_FORMAT).to_string(), "2023-11-05 08:00:00.250");
    }
}
