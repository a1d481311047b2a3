//! Backend dispatch macro.
//!
//! `DbPool` and the executor's connection handle are enums with one variant
//! per backend. This macro expands the match over those variants.

/// Dispatch over the `MySql` / `Postgres` / `SQLite` variants of `$enum`.
///
/// One body shared by every arm, for code generic over the backend:
///
/// ```ignore
/// impl_db_dispatch!(DbPool, &self.pool, |p| p.close().await);
/// ```
///
/// Or one body per arm:
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => mysql::fetch_rows(p).await,
///     Postgres(p) => postgres::fetch_rows(p).await,
///     SQLite(p) => sqlite::fetch_rows(p).await,
/// });
/// ```
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, |$p:ident| $body:expr) => {
        match $value {
            $enum::MySql($p) => $body,
            $enum::Postgres($p) => $body,
            $enum::SQLite($p) => $body,
        }
    };
    ($enum:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $enum::$variant($p) => $body,
            )+
        }
    };
}

pub(crate) use impl_db_dispatch;
