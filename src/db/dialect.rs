//! SQL dialects of the two supported backends.
//!
//! The dialects differ only in the null-safe equality operator, the upsert
//! clause, the column type of unbounded text and binary key columns, whether
//! tables are created automatically on registration, and the connection cap.

/// Connection cap of the networked backend.
pub const NETWORKED_MAX_CONNECTIONS: usize = 4;

/// The embedded file backend does not support concurrent writers.
pub const EMBEDDED_MAX_CONNECTIONS: usize = 1;

/// Length of text and binary key columns on MySQL, which cannot index
/// `TEXT`/`BLOB` without a prefix length.
pub const KEY_COLUMN_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Networked production backend (MySQL, includes MariaDB).
    MySql,
    /// Embedded single-file fallback backend.
    SQLite,
}

impl Dialect {
    /// Get the display name for this dialect.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Operator comparing two values where NULL equals NULL, padded with spaces.
    pub fn null_safe_equals(&self) -> &'static str {
        match self {
            Self::MySql => " <=> ",
            Self::SQLite => " IS ",
        }
    }

    /// Keyword introducing the update part of an upsert, padded with spaces.
    pub fn upsert_keyword(&self) -> &'static str {
        match self {
            Self::MySql => " ON DUPLICATE KEY UPDATE ",
            Self::SQLite => " ON CONFLICT DO UPDATE SET ",
        }
    }

    /// Assignment updating `column` to the value of the conflicting insert.
    pub fn upsert_assignment(&self, column: &str) -> String {
        match self {
            Self::MySql => format!("{column} = VALUES({column})"),
            Self::SQLite => format!("{column} = excluded.{column}"),
        }
    }

    /// Column type of a field that belongs to a key group.
    pub fn key_column_type<'a>(&self, sql_type: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            Self::MySql if sql_type.eq_ignore_ascii_case("TEXT") => {
                format!("VARCHAR({KEY_COLUMN_LENGTH})").into()
            }
            Self::MySql if sql_type.eq_ignore_ascii_case("BLOB") => {
                format!("VARBINARY({KEY_COLUMN_LENGTH})").into()
            }
            _ => sql_type.into(),
        }
    }

    /// Whether tables are created on registration. The networked schema is
    /// provisioned out of band.
    pub fn creates_schema(&self) -> bool {
        matches!(self, Self::SQLite)
    }

    /// Default connection cap.
    pub fn max_connections(&self) -> usize {
        match self {
            Self::MySql => NETWORKED_MAX_CONNECTIONS,
            Self::SQLite => EMBEDDED_MAX_CONNECTIONS,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
