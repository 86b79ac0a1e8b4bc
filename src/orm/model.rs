//! Table mapping for row types.

use super::value::SqlValue;

use sqlx::FromRow;
use sqlx::postgres::PgRow;

/// A row type mapped onto one table.
///
/// `values()` must line up with `COLUMNS`. Columns in `GENERATED` are
/// computed by the database: they are selected and read back after an
/// insert, but never written.
pub trait Model: for<'r> FromRow<'r, PgRow> + Send + Unpin {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str;
    /// Writable columns in declaration order.
    const COLUMNS: &'static [&'static str];
    const GENERATED: &'static [&'static str] = &[];

    fn values(&self) -> Vec<SqlValue>;

    fn primary_key(&self) -> SqlValue;
}
