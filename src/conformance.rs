//! ORM conformance scenarios.
//!
//! Each scenario opens its own [`Orm`] handle, performs one sequence of
//! ORM calls and compares the results with literal expectations. The first
//! failed expectation is returned as the error; its `Display` text is what
//! an external test runner sees.

use crate::error::{HarnessError, HarnessResult};
use crate::fixtures::{AllTypes, Blog, User};
use crate::orm::{DEFAULT_POOL_SIZE, Orm, SqlValue};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Every `all_types` column except the key.
pub const NON_KEY_COLUMNS: &[&str] = &[
    "col_bigint",
    "col_bool",
    "col_bytea",
    "col_float8",
    "col_int",
    "col_numeric",
    "col_timestamptz",
    "col_date",
];

#[allow(clippy::approx_constant)]
const FLOAT8: f64 = 3.14;

/// Parse an RFC 3339 timestamp fixture as UTC.
pub fn timestamp(value: &str) -> HarnessResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HarnessError::fixture(value, e))
}

/// Parse a `YYYY-MM-DD` date fixture.
pub fn date(value: &str) -> HarnessResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| HarnessError::fixture(value, e))
}

pub fn decimal(value: &str) -> HarnessResult<Decimal> {
    Decimal::from_str(value).map_err(|e| HarnessError::fixture(value, e))
}

fn expect_eq<T: PartialEq + fmt::Display>(field: &str, got: T, want: T) -> HarnessResult<()> {
    if got == want {
        Ok(())
    } else {
        Err(HarnessError::mismatch(field, got, want))
    }
}

/// Like [`expect_eq`] for a nullable column; NULL prints as `NULL`.
fn expect_some_eq<T: PartialEq + fmt::Display>(
    field: &str,
    got: Option<T>,
    want: T,
) -> HarnessResult<()> {
    match got {
        Some(got) => expect_eq(field, got, want),
        None => Err(HarnessError::mismatch(field, "NULL", want)),
    }
}

fn expect_affected(subject: &str, got: u64, want: u64) -> HarnessResult<()> {
    if got == want {
        Ok(())
    } else {
        Err(HarnessError::mismatch_for("affected row count", subject, got, want))
    }
}

/// Byte strings print as their decimal byte values, `[116 101 115 116]`.
#[derive(PartialEq)]
struct Bytes<'a>(&'a [u8]);

impl fmt::Display for Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", byte)?;
        }
        f.write_str("]")
    }
}

fn require<'a, T>(field: &str, value: &'a Option<T>) -> HarnessResult<&'a T> {
    value.as_ref().ok_or_else(|| HarnessError::Null(field.to_string()))
}

fn expect_null<T>(field: &str, value: &Option<T>) -> HarnessResult<()> {
    match value {
        Some(_) => Err(HarnessError::NotNull(field.to_string())),
        None => Ok(()),
    }
}

fn step<T>(name: &str, result: HarnessResult<T>) -> HarnessResult<T> {
    result.map_err(|e| HarnessError::step(name, e))
}

/// The fully populated row written by the insert and update scenarios.
fn populated_row() -> HarnessResult<AllTypes> {
    Ok(AllTypes {
        col_bigint: Some(100),
        col_bool: Some(true),
        col_bytea: Some(b"test_bytes".to_vec()),
        col_float8: Some(FLOAT8),
        col_int: Some(1),
        col_numeric: Some(decimal("6.626")?),
        col_timestamptz: Some(timestamp("2022-03-24T07:39:10.123456789+01:00")?),
        col_date: Some(date("2022-04-02")?),
        col_varchar: Some("test_string".to_string()),
    })
}

/// Create a user and a blog in one explicit transaction.
pub async fn create_blog_and_user(orm: &Orm) -> HarnessResult<()> {
    let created = timestamp("2022-09-09T12:00:00+01:00")?;
    let mut tx = step("begin transaction", orm.begin().await)?;

    let mut user = User {
        id: 1,
        name: Some("User Name".to_string()),
        age: Some(20),
        created_at: created,
        updated_at: created,
        ..Default::default()
    };
    let affected = step("create User", tx.create(&mut user).await)?;
    let name_and_number = user.name_and_number.as_deref().unwrap_or("");
    if name_and_number != "User Name null" {
        return Err(HarnessError::mismatch_for(
            "Name and number",
            "User",
            name_and_number,
            "User Name null",
        ));
    }
    expect_affected("User", affected, 1)?;

    let mut blog = Blog {
        id: 1,
        name: "My Blog".to_string(),
        user_id: 1,
        created_at: created,
        updated_at: created,
        ..Default::default()
    };
    let affected = step("create Blog", tx.create(&mut blog).await)?;
    expect_affected("Blog", affected, 1)?;

    step("commit transaction", tx.commit().await)
}

pub async fn first(orm: &Orm) -> HarnessResult<()> {
    let user = step("query first User", orm.first::<User>().await)?.unwrap_or_default();

    expect_eq("User ID", user.id, 1)?;
    expect_eq("Name", user.name.as_deref().unwrap_or(""), "Some Name")?;
    expect_eq("Email", require("Email", &user.email)?.as_str(), "user@example.com")?;
    expect_eq("Age", user.age.unwrap_or(0), 62)?;
    expect_eq(
        "Birthday",
        *require("Birthday", &user.birthday)?,
        timestamp("1960-06-27T16:44:10.123456Z")?,
    )?;
    expect_eq(
        "Member number",
        user.member_number.as_deref().unwrap_or(""),
        "MN9999",
    )?;
    expect_some_eq(
        "ActivatedAt",
        user.activated_at,
        timestamp("2021-01-04T10:00:00Z")?,
    )?;
    expect_eq("CreatedAt", user.created_at, timestamp("2000-01-01T00:00:00Z")?)?;
    expect_eq(
        "UpdatedAt",
        user.updated_at,
        timestamp("2022-05-22T12:13:14.123Z")?,
    )
}

pub async fn query_all_data_types(orm: &Orm) -> HarnessResult<()> {
    let row = step("query first AllTypes", orm.first::<AllTypes>().await)?.unwrap_or_default();

    // Nulls first, then values.
    let bigint = require("ColBigint", &row.col_bigint)?;
    let boolean = require("ColBool", &row.col_bool)?;
    let bytea = require("ColBytea", &row.col_bytea)?;
    let float8 = require("ColFloat8", &row.col_float8)?;
    let int = require("ColInt", &row.col_int)?;
    let numeric = require("ColNumeric", &row.col_numeric)?;
    let timestamptz = require("ColTimestamptz", &row.col_timestamptz)?;
    let col_date = require("ColDate", &row.col_date)?;
    let varchar = require("ColVarchar", &row.col_varchar)?;

    expect_eq("ColBigint", *bigint, 1)?;
    expect_eq("ColBool", *boolean, true)?;
    expect_eq("ColBytea", Bytes(bytea.as_slice()), Bytes(b"test".as_slice()))?;
    expect_eq("ColFloat8", *float8, FLOAT8)?;
    expect_eq("ColInt", *int, 100)?;
    expect_eq("ColNumeric", *numeric, decimal("6.626")?)?;
    expect_eq(
        "ColTimestamptz",
        *timestamptz,
        timestamp("2022-02-16T13:18:02.123456Z")?,
    )?;
    expect_eq("ColDate", *col_date, date("2022-03-29")?)?;
    expect_eq("ColVarchar", varchar.as_str(), "test")
}

pub async fn query_nulls_all_data_types(orm: &Orm) -> HarnessResult<()> {
    let row = step("query first AllTypes", orm.first::<AllTypes>().await)?.unwrap_or_default();

    expect_null("ColBigint", &row.col_bigint)?;
    expect_null("ColBool", &row.col_bool)?;
    expect_null("ColBytea", &row.col_bytea)?;
    expect_null("ColFloat8", &row.col_float8)?;
    expect_null("ColInt", &row.col_int)?;
    expect_null("ColNumeric", &row.col_numeric)?;
    expect_null("ColTimestamptz", &row.col_timestamptz)?;
    expect_null("ColDate", &row.col_date)?;
    expect_null("ColVarchar", &row.col_varchar)
}

pub async fn insert_all_data_types(orm: &Orm) -> HarnessResult<()> {
    let mut row = populated_row()?;
    let affected = step("execute insert statement", orm.create(&mut row).await)?;
    expect_eq("rows affected", affected, 1)
}

pub async fn insert_nulls_all_data_types(orm: &Orm) -> HarnessResult<()> {
    let mut row = AllTypes {
        col_bigint: Some(100),
        ..Default::default()
    };
    let affected = step("execute insert statement", orm.create(&mut row).await)?;
    expect_eq("rows affected", affected, 1)
}

pub async fn update_all_data_types(orm: &Orm) -> HarnessResult<()> {
    let row = populated_row()?;
    let affected = step("execute update statement", orm.save(&row).await)?;
    expect_eq("rows affected", affected, 1)
}

pub async fn delete(orm: &Orm) -> HarnessResult<()> {
    let row = AllTypes::with_varchar("test_string");
    let affected = step("execute delete statement", orm.delete(&row).await)?;
    expect_eq("rows affected", affected, 1)
}

pub async fn create_in_batches(orm: &Orm) -> HarnessResult<()> {
    let rows = [
        AllTypes::with_varchar("1"),
        AllTypes::with_varchar("2"),
        AllTypes::with_varchar("3"),
    ];
    let affected = step("execute insert batch", orm.create_in_batches(&rows, 10).await)?;
    expect_eq("rows affected", affected, 3)
}

pub async fn transaction(orm: &Orm) -> HarnessResult<()> {
    let result = orm
        .transaction(|tx| {
            Box::pin(async move {
                tx.create_omitting(&AllTypes::with_varchar("1"), NON_KEY_COLUMNS)
                    .await?;
                tx.create_omitting(&AllTypes::with_varchar("2"), NON_KEY_COLUMNS)
                    .await?;
                Ok::<(), HarnessError>(())
            })
        })
        .await;
    step("execute transaction", result)
}

pub async fn nested_transaction(orm: &Orm) -> HarnessResult<()> {
    let result = orm
        .transaction(|tx| {
            Box::pin(async move {
                tx.create_omitting(&AllTypes::with_varchar("1"), NON_KEY_COLUMNS)
                    .await?;
                tx.transaction(|inner| {
                    Box::pin(async move {
                        inner
                            .create_omitting(&AllTypes::with_varchar("2"), NON_KEY_COLUMNS)
                            .await?;
                        Ok::<(), HarnessError>(())
                    })
                })
                .await
            })
        })
        .await;
    step("execute nested transaction", result)
}

/// Insert a row; if that fails, try updating it in the same (now aborted)
/// transaction and surface whatever that returns.
pub async fn error_in_transaction(orm: &Orm) -> HarnessResult<()> {
    let result = orm
        .transaction(|tx| {
            Box::pin(async move {
                let row = AllTypes::with_varchar("1");
                if let Err(e) = tx.create_omitting(&row, NON_KEY_COLUMNS).await {
                    debug!(error = %e, "insert failed, trying update");
                    tx.update_column(&row, "col_int", SqlValue::BigInt(Some(100)))
                        .await?;
                }
                Ok::<(), HarnessError>(())
            })
        })
        .await;
    step("execute transaction", result)
}

pub async fn read_only_transaction(orm: &Orm) -> HarnessResult<()> {
    let result = orm
        .read_only_transaction(|tx| {
            Box::pin(async move {
                tx.find(&AllTypes::with_varchar("1")).await?;
                tx.find(&AllTypes::with_varchar("2")).await?;
                Ok::<(), HarnessError>(())
            })
        })
        .await;
    step("execute read-only transaction", result)
}

/// A named conformance scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    CreateBlogAndUser,
    First,
    QueryAllDataTypes,
    QueryNullsAllDataTypes,
    InsertAllDataTypes,
    InsertNullsAllDataTypes,
    UpdateAllDataTypes,
    Delete,
    CreateInBatches,
    Transaction,
    NestedTransaction,
    ErrorInTransaction,
    ReadOnlyTransaction,
}

impl Scenario {
    pub const ALL: [Scenario; 13] = [
        Scenario::CreateBlogAndUser,
        Scenario::First,
        Scenario::QueryAllDataTypes,
        Scenario::QueryNullsAllDataTypes,
        Scenario::InsertAllDataTypes,
        Scenario::InsertNullsAllDataTypes,
        Scenario::UpdateAllDataTypes,
        Scenario::Delete,
        Scenario::CreateInBatches,
        Scenario::Transaction,
        Scenario::NestedTransaction,
        Scenario::ErrorInTransaction,
        Scenario::ReadOnlyTransaction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::CreateBlogAndUser => "create_blog_and_user",
            Scenario::First => "first",
            Scenario::QueryAllDataTypes => "query_all_data_types",
            Scenario::QueryNullsAllDataTypes => "query_nulls_all_data_types",
            Scenario::InsertAllDataTypes => "insert_all_data_types",
            Scenario::InsertNullsAllDataTypes => "insert_nulls_all_data_types",
            Scenario::UpdateAllDataTypes => "update_all_data_types",
            Scenario::Delete => "delete",
            Scenario::CreateInBatches => "create_in_batches",
            Scenario::Transaction => "transaction",
            Scenario::NestedTransaction => "nested_transaction",
            Scenario::ErrorInTransaction => "error_in_transaction",
            Scenario::ReadOnlyTransaction => "read_only_transaction",
        }
    }

    /// Run the scenario against an already open handle.
    pub async fn check(self, orm: &Orm) -> HarnessResult<()> {
        match self {
            Scenario::CreateBlogAndUser => create_blog_and_user(orm).await,
            Scenario::First => first(orm).await,
            Scenario::QueryAllDataTypes => query_all_data_types(orm).await,
            Scenario::QueryNullsAllDataTypes => query_nulls_all_data_types(orm).await,
            Scenario::InsertAllDataTypes => insert_all_data_types(orm).await,
            Scenario::InsertNullsAllDataTypes => insert_nulls_all_data_types(orm).await,
            Scenario::UpdateAllDataTypes => update_all_data_types(orm).await,
            Scenario::Delete => delete(orm).await,
            Scenario::CreateInBatches => create_in_batches(orm).await,
            Scenario::Transaction => transaction(orm).await,
            Scenario::NestedTransaction => nested_transaction(orm).await,
            Scenario::ErrorInTransaction => error_in_transaction(orm).await,
            Scenario::ReadOnlyTransaction => read_only_transaction(orm).await,
        }
    }

    /// Open a handle on `url`, run the scenario and close the handle.
    pub async fn run(self, url: &str) -> HarnessResult<()> {
        self.run_with(url, DEFAULT_POOL_SIZE).await
    }

    /// [`Scenario::run`] with a handle of `pool_size` connections.
    pub async fn run_with(self, url: &str, pool_size: u32) -> HarnessResult<()> {
        info!(scenario = self.name(), pool_size, "running scenario");
        let orm = Orm::open_with(url, pool_size).await?;
        let result = self.check(&orm).await;
        orm.close().await;
        match &result {
            Ok(()) => info!(scenario = self.name(), "scenario passed"),
            Err(e) => info!(scenario = self.name(), error = %e, "scenario failed"),
        }
        result
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == wanted)
            .ok_or_else(|| HarnessError::InvalidArgument(format!("unknown scenario '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[test]
    fn test_scenario_names_round_trip() {
        let names: HashSet<&str> = Scenario::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), Scenario::ALL.len());
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), scenario);
        }
        assert_eq!(
            "Nested-Transaction".parse::<Scenario>().unwrap(),
            Scenario::NestedTransaction
        );
        assert!("vacuum".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_fixture_parsing() {
        let ts = timestamp("2022-09-09T12:00:00+01:00").unwrap();
        assert_eq!(ts, timestamp("2022-09-09T11:00:00Z").unwrap());
        assert_eq!(date("2022-03-29").unwrap(), NaiveDate::from_ymd_opt(2022, 3, 29).unwrap());
        assert_eq!(decimal("6.626").unwrap(), Decimal::new(6626, 3));
        assert!(matches!(
            timestamp("yesterday"),
            Err(HarnessError::Fixture { .. })
        ));
    }

    #[test]
    fn test_populated_row() {
        let row = populated_row().unwrap();
        assert_eq!(row.col_varchar.as_deref(), Some("test_string"));
        assert_eq!(
            row.col_timestamptz.unwrap(),
            timestamp("2022-03-24T06:39:10.123456789Z").unwrap()
        );
    }

    #[test]
    fn test_expectation_messages() {
        let err = expect_eq("Age", 61, 62).unwrap_err();
        assert_eq!(err.to_string(), "Age mismatch\nGot:  61\nWant: 62");

        let err = require::<String>("Email", &None).unwrap_err();
        assert_eq!(err.to_string(), "Email is null");

        let err = expect_null("ColBool", &Some(true)).unwrap_err();
        assert_eq!(err.to_string(), "ColBool is not null");

        assert!(expect_eq("Name", "Some Name", "Some Name").is_ok());
    }

    #[test]
    fn test_mismatch_prints_bare_values() {
        let err = expect_eq("Name", "Other", "Some Name").unwrap_err();
        assert_eq!(err.to_string(), "Name mismatch\nGot:  Other\nWant: Some Name");

        let want = timestamp("2021-01-04T10:00:00Z").unwrap();
        let err = expect_some_eq("ActivatedAt", None, want).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ActivatedAt mismatch\nGot:  NULL\nWant: 2021-01-04 10:00:00 UTC"
        );
        let err = expect_some_eq("ActivatedAt", Some(want + chrono::Duration::hours(1)), want)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ActivatedAt mismatch\nGot:  2021-01-04 11:00:00 UTC\nWant: 2021-01-04 10:00:00 UTC"
        );

        let err = expect_eq("ColBytea", Bytes(b"te".as_slice()), Bytes(b"test".as_slice()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ColBytea mismatch\nGot:  [116 101]\nWant: [116 101 115 116]"
        );
    }

    #[test]
    fn test_affected_row_labels() {
        let err = expect_affected("User", 0, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "affected row count mismatch for User\nGot:  0\nWant: 1"
        );
        let err = expect_eq("rows affected", 2u64, 3).unwrap_err();
        assert_eq!(err.to_string(), "rows affected mismatch\nGot:  2\nWant: 3");
        assert!(expect_affected("Blog", 1, 1).is_ok());
    }

    #[test]
    fn test_step_wraps_error() {
        let err = step::<()>(
            "execute insert batch",
            Err(HarnessError::Execution("boom".to_string())),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to execute insert batch: Execution error: boom"
        );
    }

    #[tokio::test]
    async fn test_run_reports_bad_connection_string() {
        let err = Scenario::First.run("not a connection string").await.unwrap_err();
        assert!(matches!(err, HarnessError::Connection(_)));

        let err = Scenario::Delete
            .run_with("not a connection string", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Connection(_)));
    }
}
