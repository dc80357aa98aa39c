//! Backend dispatch macros for reducing code duplication.
//!
//! The runtime-selected backend is an enum over the concrete drivers. These
//! macros generate the repetitive match statements over its variants.

/// Macro for generating backend dispatch match arms.
///
/// The first argument names the enum in `crate::db::any`.
///
/// # Example
///
/// ```ignore
/// impl_backend_dispatch!(AnyConnection, conn, {
///     MySql(c) => c.is_valid(),
///     SQLite(c) => c.is_valid(),
/// });
/// ```
#[macro_export]
macro_rules! impl_backend_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::any::$kind::$variant($p) => $body,
            )+
        }
    };
}

/// Dispatch a connection together with a compiled statement of the same
/// backend. A pairing across backends is an internal error.
#[macro_export]
macro_rules! impl_paired_dispatch {
    ($conn:expr, $compiled:expr, ($c:ident, $s:ident) => $body:expr) => {
        match ($conn, $compiled) {
            ($crate::db::any::AnyConnection::MySql($c), $crate::db::any::AnyCompiled::MySql($s)) => {
                $body
            }
            (
                $crate::db::any::AnyConnection::SQLite($c),
                $crate::db::any::AnyCompiled::SQLite($s),
            ) => $body,
            _ => Err($crate::error::DbError::internal(
                "Compiled statement used on a connection of another backend",
            )),
        }
    };
}

pub use impl_backend_dispatch;
pub use impl_paired_dispatch;
