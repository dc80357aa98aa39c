//! Data models for the storage layer.
//!
//! This module re-exports the backend-neutral value model, the type mapper
//! registry and the declarative table metadata.

pub mod mapper;
pub mod table;
pub mod value;

// Re-export commonly used types
pub use mapper::{Param, SqlEnum, TypeMapper, TypeMapperRegistry, TypeMapperRegistryBuilder};
pub use table::{FieldDescriptor, FieldSpec, FieldValues, KeyGroup, PRIMARY, TableDescriptor};
pub use value::{Null, Row, SqlValue};
