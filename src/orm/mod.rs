//! Model-driven ORM handle over a sqlx PostgreSQL pool.
//!
//! ```rust,ignore
//! let orm = Orm::open("postgres://localhost/db").await?;
//! let mut user = User { id: 1, name: "User Name".into(), ..Default::default() };
//! orm.create(&mut user).await?;
//!
//! orm.transaction(|tx| Box::pin(async move {
//!     tx.create(&mut AllTypes::with_varchar("1")).await?;
//!     Ok(())
//! }))
//! .await?;
//! orm.close().await;
//! ```

pub mod model;
pub mod statement;
pub mod value;

pub use model::Model;
pub use statement::Statement;
pub use value::SqlValue;

use crate::error::{HarnessError, HarnessResult};

use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgExecutor, Postgres, Transaction};
use tracing::{debug, warn};

/// Pool size used by [`Orm::open`].
pub const DEFAULT_POOL_SIZE: u32 = 4;

async fn execute<'e, E: PgExecutor<'e>>(executor: E, stmt: Statement) -> HarnessResult<u64> {
    debug!(sql = %stmt.sql, params = stmt.params.len(), "execute");
    let args = stmt.arguments()?;
    let result = sqlx::query_with(&stmt.sql, args)
        .execute(executor)
        .await
        .map_err(|e| HarnessError::Execution(e.to_string()))?;
    Ok(result.rows_affected())
}

async fn fetch_optional<'e, E: PgExecutor<'e>, M: Model>(
    executor: E,
    stmt: Statement,
) -> HarnessResult<Option<M>> {
    debug!(sql = %stmt.sql, params = stmt.params.len(), "fetch");
    let args = stmt.arguments()?;
    sqlx::query_as_with::<_, M, _>(&stmt.sql, args)
        .fetch_optional(executor)
        .await
        .map_err(|e| HarnessError::Execution(e.to_string()))
}

async fn create_row<'e, E: PgExecutor<'e>, M: Model>(executor: E, row: &mut M) -> HarnessResult<u64> {
    if M::GENERATED.is_empty() {
        return execute(executor, statement::insert(std::slice::from_ref(&*row), &[], false)).await;
    }
    let stmt = statement::insert(std::slice::from_ref(&*row), &[], true);
    match fetch_optional::<_, M>(executor, stmt).await? {
        Some(stored) => {
            *row = stored;
            Ok(1)
        }
        None => Ok(0),
    }
}

/// An open ORM handle.
#[derive(Clone)]
pub struct Orm {
    pool: PgPool,
}

impl Orm {
    /// Open a handle with [`DEFAULT_POOL_SIZE`] connections.
    pub async fn open(url: &str) -> HarnessResult<Self> {
        Self::open_with(url, DEFAULT_POOL_SIZE).await
    }

    pub async fn open_with(url: &str, max_connections: u32) -> HarnessResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(|e| HarnessError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Insert `row`. Database-generated columns are read back into it.
    pub async fn create<M: Model>(&self, row: &mut M) -> HarnessResult<u64> {
        create_row(&self.pool, row).await
    }

    /// Insert `row` without the `omit` columns.
    pub async fn create_omitting<M: Model>(&self, row: &M, omit: &[&str]) -> HarnessResult<u64> {
        execute(&self.pool, statement::insert(std::slice::from_ref(row), omit, false)).await
    }

    /// Insert `rows` in multi-row statements of at most `batch_size` rows,
    /// all inside one transaction.
    pub async fn create_in_batches<M: Model>(&self, rows: &[M], batch_size: usize) -> HarnessResult<u64> {
        let mut tx = self.begin().await?;
        let affected = tx.create_in_batches(rows, batch_size).await?;
        tx.commit().await?;
        Ok(affected)
    }

    /// Update `row` by primary key, inserting it when no row matched.
    pub async fn save<M: Model>(&self, row: &M) -> HarnessResult<u64> {
        let mut tx = self.begin().await?;
        let affected = tx.save(row).await?;
        tx.commit().await?;
        Ok(affected)
    }

    pub async fn update_column<M: Model>(
        &self,
        row: &M,
        column: &str,
        value: SqlValue,
    ) -> HarnessResult<u64> {
        execute(&self.pool, statement::update_column(row, column, value)?).await
    }

    pub async fn delete<M: Model>(&self, row: &M) -> HarnessResult<u64> {
        execute(&self.pool, statement::delete(row)).await
    }

    /// First row in primary key order.
    pub async fn first<M: Model>(&self) -> HarnessResult<Option<M>> {
        fetch_optional(&self.pool, statement::first::<M>()).await
    }

    /// Row with the same primary key as `row`.
    pub async fn find<M: Model>(&self, row: &M) -> HarnessResult<Option<M>> {
        fetch_optional(&self.pool, statement::find(row)).await
    }

    pub async fn begin(&self) -> HarnessResult<Tx<'static>> {
        let inner = self
            .pool
            .begin()
            .await
            .map_err(|e| HarnessError::Execution(e.to_string()))?;
        Ok(Tx { inner })
    }

    pub async fn begin_read_only(&self) -> HarnessResult<Tx<'static>> {
        let mut tx = self.begin().await?;
        execute(
            &mut *tx.inner,
            Statement {
                sql: "SET TRANSACTION READ ONLY".to_string(),
                params: Vec::new(),
            },
        )
        .await?;
        Ok(tx)
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn transaction<F, R>(&self, f: F) -> HarnessResult<R>
    where
        F: for<'t> FnOnce(&'t mut Tx<'static>) -> BoxFuture<'t, HarnessResult<R>>,
    {
        self.begin().await?.settle(f).await
    }

    /// Like [`Orm::transaction`] with a read-only transaction.
    pub async fn read_only_transaction<F, R>(&self, f: F) -> HarnessResult<R>
    where
        F: for<'t> FnOnce(&'t mut Tx<'static>) -> BoxFuture<'t, HarnessResult<R>>,
    {
        self.begin_read_only().await?.settle(f).await
    }
}

/// An open transaction. Dropping it without commit rolls it back.
pub struct Tx<'c> {
    inner: Transaction<'c, Postgres>,
}

impl<'c> Tx<'c> {
    pub async fn create<M: Model>(&mut self, row: &mut M) -> HarnessResult<u64> {
        create_row(&mut *self.inner, row).await
    }

    pub async fn create_omitting<M: Model>(&mut self, row: &M, omit: &[&str]) -> HarnessResult<u64> {
        execute(
            &mut *self.inner,
            statement::insert(std::slice::from_ref(row), omit, false),
        )
        .await
    }

    /// A `batch_size` of zero sends all rows in one statement.
    pub async fn create_in_batches<M: Model>(&mut self, rows: &[M], batch_size: usize) -> HarnessResult<u64> {
        let size = if batch_size == 0 { rows.len().max(1) } else { batch_size };
        let mut affected = 0;
        for chunk in rows.chunks(size) {
            affected += execute(&mut *self.inner, statement::insert(chunk, &[], false)).await?;
        }
        Ok(affected)
    }

    pub async fn save<M: Model>(&mut self, row: &M) -> HarnessResult<u64> {
        let updated = execute(&mut *self.inner, statement::update(row)).await?;
        if updated > 0 {
            return Ok(updated);
        }
        execute(
            &mut *self.inner,
            statement::insert(std::slice::from_ref(row), &[], false),
        )
        .await
    }

    pub async fn update_column<M: Model>(
        &mut self,
        row: &M,
        column: &str,
        value: SqlValue,
    ) -> HarnessResult<u64> {
        execute(&mut *self.inner, statement::update_column(row, column, value)?).await
    }

    pub async fn delete<M: Model>(&mut self, row: &M) -> HarnessResult<u64> {
        execute(&mut *self.inner, statement::delete(row)).await
    }

    pub async fn first<M: Model>(&mut self) -> HarnessResult<Option<M>> {
        fetch_optional(&mut *self.inner, statement::first::<M>()).await
    }

    pub async fn find<M: Model>(&mut self, row: &M) -> HarnessResult<Option<M>> {
        fetch_optional(&mut *self.inner, statement::find(row)).await
    }

    /// Open a nested transaction (a savepoint). Its work survives only if
    /// this transaction commits too.
    pub async fn begin(&mut self) -> HarnessResult<Tx<'_>> {
        let inner = sqlx::Connection::begin(&mut *self.inner)
            .await
            .map_err(|e| HarnessError::Execution(e.to_string()))?;
        Ok(Tx { inner })
    }

    /// Run `f` in a nested transaction.
    pub async fn transaction<'s, F, R>(&'s mut self, f: F) -> HarnessResult<R>
    where
        F: for<'t> FnOnce(&'t mut Tx<'s>) -> BoxFuture<'t, HarnessResult<R>>,
    {
        self.begin().await?.settle(f).await
    }

    pub async fn commit(self) -> HarnessResult<()> {
        self.inner
            .commit()
            .await
            .map_err(|e| HarnessError::Execution(e.to_string()))
    }

    pub async fn rollback(self) -> HarnessResult<()> {
        self.inner
            .rollback()
            .await
            .map_err(|e| HarnessError::Execution(e.to_string()))
    }

    async fn settle<F, R>(mut self, f: F) -> HarnessResult<R>
    where
        F: for<'t> FnOnce(&'t mut Tx<'c>) -> BoxFuture<'t, HarnessResult<R>>,
    {
        let result = f(&mut self).await;
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
