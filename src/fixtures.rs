//! Row types used by the conformance scenarios.
//!
//! They mirror the `users`, `blogs` and `all_types` tables of the test
//! schema.

use crate::orm::{Model, SqlValue};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<i64>,
    pub birthday: Option<DateTime<Utc>>,
    pub member_number: Option<String>,
    /// `coalesce(concat(name, ' ', member_number))`, computed by the database.
    pub name_and_number: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model for User {
    const TABLE: &'static str = "users";
    const PRIMARY_KEY: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "email",
        "age",
        "birthday",
        "member_number",
        "activated_at",
        "created_at",
        "updated_at",
    ];
    const GENERATED: &'static [&'static str] = &["name_and_number"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::BigInt(Some(self.id)),
            SqlValue::Text(self.name.clone()),
            SqlValue::Text(self.email.clone()),
            SqlValue::BigInt(self.age),
            SqlValue::Timestamptz(self.birthday),
            SqlValue::Text(self.member_number.clone()),
            SqlValue::Timestamptz(self.activated_at),
            SqlValue::Timestamptz(Some(self.created_at)),
            SqlValue::Timestamptz(Some(self.updated_at)),
        ]
    }

    fn primary_key(&self) -> SqlValue {
        SqlValue::BigInt(Some(self.id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct Blog {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model for Blog {
    const TABLE: &'static str = "blogs";
    const PRIMARY_KEY: &'static str = "id";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "description",
        "user_id",
        "created_at",
        "updated_at",
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::BigInt(Some(self.id)),
            SqlValue::Text(Some(self.name.clone())),
            SqlValue::Text(self.description.clone()),
            SqlValue::BigInt(Some(self.user_id)),
            SqlValue::Timestamptz(Some(self.created_at)),
            SqlValue::Timestamptz(Some(self.updated_at)),
        ]
    }

    fn primary_key(&self) -> SqlValue {
        SqlValue::BigInt(Some(self.id))
    }
}

/// One column per supported type, all nullable. Keyed by `col_varchar`.
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct AllTypes {
    pub col_bigint: Option<i64>,
    pub col_bool: Option<bool>,
    pub col_bytea: Option<Vec<u8>>,
    pub col_float8: Option<f64>,
    pub col_int: Option<i64>,
    pub col_numeric: Option<Decimal>,
    pub col_timestamptz: Option<DateTime<Utc>>,
    pub col_date: Option<NaiveDate>,
    pub col_varchar: Option<String>,
}

impl AllTypes {
    /// A row with only the key set.
    pub fn with_varchar(key: &str) -> Self {
        Self {
            col_varchar: Some(key.to_string()),
            ..Default::default()
        }
    }
}

impl Model for AllTypes {
    const TABLE: &'static str = "all_types";
    const PRIMARY_KEY: &'static str = "col_varchar";
    const COLUMNS: &'static [&'static str] = &[
        "col_bigint",
        "col_bool",
        "col_bytea",
        "col_float8",
        "col_int",
        "col_numeric",
        "col_timestamptz",
        "col_date",
        "col_varchar",
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::BigInt(self.col_bigint),
            SqlValue::Bool(self.col_bool),
            SqlValue::Bytes(self.col_bytea.clone()),
            SqlValue::Float(self.col_float8),
            SqlValue::BigInt(self.col_int),
            SqlValue::Numeric(self.col_numeric),
            SqlValue::Timestamptz(self.col_timestamptz),
            SqlValue::Date(self.col_date),
            SqlValue::Text(self.col_varchar.clone()),
        ]
    }

    fn primary_key(&self) -> SqlValue {
        SqlValue::Text(self.col_varchar.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_aligned<M: Model>(row: &M) {
        assert_eq!(row.values().len(), M::COLUMNS.len(), "{}", M::TABLE);
        assert!(M::COLUMNS.contains(&M::PRIMARY_KEY), "{}", M::TABLE);
        assert!(
            M::GENERATED.iter().all(|c| !M::COLUMNS.contains(c)),
            "{}",
            M::TABLE
        );
    }

    #[test]
    fn test_columns_line_up_with_values() {
        assert_aligned(&User::default());
        assert_aligned(&Blog::default());
        assert_aligned(&AllTypes::default());
    }

    #[test]
    fn test_primary_key_value_matches_column() {
        let row = AllTypes::with_varchar("k");
        let pk_index = AllTypes::COLUMNS
            .iter()
            .position(|c| *c == AllTypes::PRIMARY_KEY)
            .unwrap();
        assert_eq!(row.values()[pk_index], row.primary_key());

        let user = User {
            id: 7,
            ..Default::default()
        };
        assert_eq!(user.values()[0], user.primary_key());
    }
}
