//! Typed parameter values.

use crate::error::{HarnessError, HarnessResult};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Arguments;
use sqlx::postgres::PgArguments;

/// A nullable parameter value.
///
/// A NULL keeps its column type so it binds as a typed NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    BigInt(Option<i64>),
    Bool(Option<bool>),
    Bytes(Option<Vec<u8>>),
    Float(Option<f64>),
    Numeric(Option<Decimal>),
    Text(Option<String>),
    Timestamptz(Option<DateTime<Utc>>),
    Date(Option<NaiveDate>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::BigInt(v) => v.is_none(),
            SqlValue::Bool(v) => v.is_none(),
            SqlValue::Bytes(v) => v.is_none(),
            SqlValue::Float(v) => v.is_none(),
            SqlValue::Numeric(v) => v.is_none(),
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Timestamptz(v) => v.is_none(),
            SqlValue::Date(v) => v.is_none(),
        }
    }
}

/// Bind values in order as `$1..$n`.
pub fn arguments(values: &[SqlValue]) -> HarnessResult<PgArguments> {
    let mut args = PgArguments::default();
    for (i, value) in values.iter().enumerate() {
        let bound = match value {
            SqlValue::BigInt(v) => args.add(*v),
            SqlValue::Bool(v) => args.add(*v),
            SqlValue::Bytes(v) => args.add(v.clone()),
            SqlValue::Float(v) => args.add(*v),
            SqlValue::Numeric(v) => args.add(*v),
            SqlValue::Text(v) => args.add(v.clone()),
            SqlValue::Timestamptz(v) => args.add(*v),
            SqlValue::Date(v) => args.add(*v),
        };
        bound.map_err(|e| HarnessError::Execution(format!("failed to bind ${}: {}", i + 1, e)))?;
    }
    Ok(args)
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::BigInt(Some(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(Some(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(Some(v))
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Numeric(Some(v))
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(Some(v))
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Some(v))
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamptz(Some(v))
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from() {
        assert_eq!(SqlValue::from(42i64), SqlValue::BigInt(Some(42)));
        assert_eq!(SqlValue::from("x"), SqlValue::Text(Some("x".to_string())));
        assert_eq!(SqlValue::from(true), SqlValue::Bool(Some(true)));
    }

    #[test]
    fn test_typed_nulls() {
        assert!(SqlValue::Date(None).is_null());
        assert!(SqlValue::Bytes(None).is_null());
        assert!(!SqlValue::from(vec![1u8]).is_null());
    }

    #[test]
    fn test_arguments_accepts_every_variant() {
        let values = vec![
            SqlValue::BigInt(None),
            SqlValue::Bool(Some(true)),
            SqlValue::Bytes(Some(b"test".to_vec())),
            SqlValue::Float(Some(2.5)),
            SqlValue::Numeric(Some(Decimal::new(6626, 3))),
            SqlValue::Text(None),
            SqlValue::Timestamptz(Some(Utc::now())),
            SqlValue::Date(NaiveDate::from_ymd_opt(2022, 4, 2)),
        ];
        assert!(arguments(&values).is_ok());
    }
}
